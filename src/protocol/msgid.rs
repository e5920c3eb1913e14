//! Per-session message-id allocation for RPC/reply correlation.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{NetconfError, Result};

/// Default wrap bound for message ids.
pub const DEFAULT_MSGID_LIMIT: u64 = u32::MAX as u64;

/// Identifier carried in the `message-id` attribute of an RPC and its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out strictly increasing ids, wrapping to 1 after `limit`.
///
/// An id stays reserved until [`MessageIdAllocator::complete`] is called for
/// it; after a wrap, reserved ids are skipped.
#[derive(Debug, Clone)]
pub struct MessageIdAllocator {
    next: u64,
    limit: u64,
    outstanding: BTreeSet<u64>,
}

impl Default for MessageIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIdAllocator {
    /// Create an allocator starting at 1.
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MSGID_LIMIT)
    }

    /// Create an allocator that wraps after `limit` (minimum 1).
    pub fn with_limit(limit: u64) -> Self {
        Self {
            next: 1,
            limit: limit.max(1),
            outstanding: BTreeSet::new(),
        }
    }

    /// Reserve the next free id.
    pub fn allocate(&mut self) -> Result<MessageId> {
        if self.outstanding.len() as u64 >= self.limit {
            return Err(NetconfError::Usage(format!(
                "all {} message ids are outstanding",
                self.limit
            )));
        }

        loop {
            let candidate = self.next;
            self.next = if self.next >= self.limit { 1 } else { self.next + 1 };
            if self.outstanding.insert(candidate) {
                return Ok(MessageId(candidate));
            }
        }
    }

    /// Release an id once its reply arrived. Returns whether it was outstanding.
    pub fn complete(&mut self, id: MessageId) -> bool {
        self.outstanding.remove(&id.0)
    }

    /// Whether `id` is awaiting a reply.
    pub fn is_outstanding(&self, id: MessageId) -> bool {
        self.outstanding.contains(&id.0)
    }

    /// Number of ids awaiting a reply.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}
