//! Server-side session-id allocation.
//!
//! Ids are unique among the open sessions of one [`SessionRegistry`]. Each
//! allocation is an [`IdLease`] that returns the id when dropped, which
//! happens when the owning session terminates or is freed, or when
//! establishment fails.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{NetconfError, Result};

#[derive(Debug)]
struct RegistryState {
    next: u32,
    active: BTreeSet<u32>,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            next: 1,
            active: BTreeSet::new(),
        }
    }
}

/// Registry of session ids in use.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve the next free id. Ids start at 1 and wrap, skipping ids in use.
    pub fn lease(&self) -> Result<IdLease> {
        let mut state = self.lock();
        if state.active.len() >= u32::MAX as usize {
            return Err(NetconfError::Usage("no free session id".to_string()));
        }

        let mut id = state.next;
        while state.active.contains(&id) {
            id = id.checked_add(1).unwrap_or(1);
        }
        state.next = id.checked_add(1).unwrap_or(1);
        state.active.insert(id);

        Ok(IdLease {
            id,
            registry: Arc::clone(&self.inner),
        })
    }

    /// Number of ids in use.
    pub fn active(&self) -> usize {
        self.lock().active.len()
    }

    /// Whether `id` is in use.
    pub fn contains(&self, id: u32) -> bool {
        self.lock().active.contains(&id)
    }
}

/// A reserved session id, released on drop.
pub struct IdLease {
    id: u32,
    registry: Arc<Mutex<RegistryState>>,
}

impl IdLease {
    /// The reserved id.
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Drop for IdLease {
    fn drop(&mut self) {
        let mut state = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        state.active.remove(&self.id);
    }
}

impl fmt::Debug for IdLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdLease").field("id", &self.id).finish()
    }
}
