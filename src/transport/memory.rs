//! Loopback transport for tests and demos.
//!
//! [`pair`] returns a connector and a listener joined in memory. Every channel
//! is a tokio duplex pipe wrapped in a [`StreamChannel`], so framing and link
//! state behave as on a real stream. The connector keeps leak counters and a
//! log of authentication attempts.
//!
//! ```text
//! MemoryConnector ──connect──▶ MemoryConnection ──open_channel──┐
//!                                                               │ duplex
//! MemoryListener ◀────────────── Incoming (server end) ◀────────┘
//! ```

use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use super::{Channel, Connection, Connector, Incoming, Listener, StreamChannel, UserAuth};
use crate::error::{NetconfError, Result};
use crate::protocol::{AuthMethod, AuthOutcome};

/// Duplex buffer size per channel.
const PIPE_CAPACITY: usize = 64 * 1024;

/// First local port handed to a loopback connection.
const FIRST_EPHEMERAL_PORT: u16 = 49152;

/// Which SSH auth methods the loopback server offers and accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPolicy {
    /// Methods listed in the server's "can continue" set
    pub advertised: Vec<AuthMethod>,
    /// Methods that succeed when attempted
    pub accepted: Vec<AuthMethod>,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        let all = vec![AuthMethod::PublicKey, AuthMethod::Password, AuthMethod::Interactive];
        Self {
            advertised: all.clone(),
            accepted: all,
        }
    }
}

impl AuthPolicy {
    /// Offer every method but accept only `methods`.
    pub fn accept_only(methods: &[AuthMethod]) -> Self {
        Self {
            accepted: methods.to_vec(),
            ..Self::default()
        }
    }
}

struct Shared {
    policy: AuthPolicy,
    attempts: Mutex<Vec<AuthMethod>>,
    connections: Arc<AtomicUsize>,
    channels: Arc<AtomicUsize>,
    next_port: AtomicU16,
    incoming: mpsc::UnboundedSender<Incoming>,
}

/// Create a connected connector/listener pair.
pub fn pair(policy: AuthPolicy) -> (MemoryConnector, MemoryListener) {
    let (incoming, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        policy,
        attempts: Mutex::new(Vec::new()),
        connections: Arc::new(AtomicUsize::new(0)),
        channels: Arc::new(AtomicUsize::new(0)),
        next_port: AtomicU16::new(FIRST_EPHEMERAL_PORT),
        incoming,
    });
    (MemoryConnector { shared }, MemoryListener { incoming: rx })
}

/// Decrements a counter when dropped.
struct CountGuard(Arc<AtomicUsize>);

impl CountGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for CountGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Client side of the loopback transport.
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    /// Every auth method attempted so far, in order.
    pub fn attempts(&self) -> Vec<AuthMethod> {
        self.shared
            .attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Connections not yet dropped.
    pub fn open_connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Channel endpoints (client and server ends) not yet dropped.
    pub fn open_channels(&self) -> usize {
        self.shared.channels.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<Box<dyn Connection>>> {
        Box::pin(async move {
            if self.shared.incoming.is_closed() {
                return Err(NetconfError::Transport(format!(
                    "connection refused by {}:{}",
                    host, port
                )));
            }
            let local_port = self.shared.next_port.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Loopback connection to {}:{} from port {}", host, port, local_port);
            Ok(Box::new(MemoryConnection {
                shared: Arc::clone(&self.shared),
                local_port,
                user: None,
                _guard: CountGuard::acquire(&self.shared.connections),
            }) as Box<dyn Connection>)
        })
    }
}

struct MemoryConnection {
    shared: Arc<Shared>,
    local_port: u16,
    user: Option<String>,
    _guard: CountGuard,
}

impl UserAuth for MemoryConnection {
    fn auth_methods<'a>(&'a mut self, _user: &'a str) -> BoxFuture<'a, Result<Vec<AuthMethod>>> {
        Box::pin(async move { Ok(self.shared.policy.advertised.clone()) })
    }

    fn authenticate<'a>(
        &'a mut self,
        user: &'a str,
        method: AuthMethod,
    ) -> BoxFuture<'a, Result<AuthOutcome>> {
        Box::pin(async move {
            self.shared
                .attempts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(method);

            let policy = &self.shared.policy;
            if policy.advertised.contains(&method) && policy.accepted.contains(&method) {
                self.user = Some(user.to_string());
                Ok(AuthOutcome::Success)
            } else {
                Ok(AuthOutcome::Failure {
                    methods_can_continue: policy.advertised.clone(),
                    partial_success: false,
                })
            }
        })
    }
}

impl Connection for MemoryConnection {
    fn open_channel(&mut self) -> BoxFuture<'_, Result<Box<dyn Channel>>> {
        Box::pin(async move {
            let user = self.user.clone().ok_or_else(|| {
                NetconfError::Authentication("channel requested before authentication".to_string())
            })?;

            let (client_end, server_end) = tokio::io::duplex(PIPE_CAPACITY);
            let client = StreamChannel::new(client_end)
                .with_lease(CountGuard::acquire(&self.shared.channels));
            let server = StreamChannel::new(server_end)
                .with_lease(CountGuard::acquire(&self.shared.channels));

            let incoming = Incoming {
                channel: Box::new(server),
                host: "127.0.0.1".to_string(),
                port: self.local_port,
                user,
            };
            self.shared
                .incoming
                .send(incoming)
                .map_err(|_| NetconfError::Transport("connection refused: listener closed".to_string()))?;

            Ok(Box::new(client) as Box<dyn Channel>)
        })
    }
}

/// Server side of the loopback transport.
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<Incoming>,
}

impl Listener for MemoryListener {
    fn accept(&mut self) -> BoxFuture<'_, Result<Incoming>> {
        Box::pin(async move {
            self.incoming
                .recv()
                .await
                .ok_or_else(|| NetconfError::Transport("listener closed".to_string()))
        })
    }
}
