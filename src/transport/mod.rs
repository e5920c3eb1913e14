//! Transport abstraction for NETCONF sessions.
//!
//! The secure transport (SSH key exchange, encryption, channel framing on the
//! SSH side) is provided by an implementation of these traits. The session
//! core only needs to:
//!
//! - connect to a host and authenticate a user with a given method,
//! - open one channel per NETCONF session, possibly several per connection,
//! - exchange framed messages on a channel,
//! - observe link state to detect drops.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │          Client / Server (establish)         │
//! └──────────────┬──────────────────────┬────────┘
//!                │ Connector            │ Listener
//!                ▼                      ▼
//!       ┌──────────────────┐   ┌──────────────────┐
//!       │ SharedConnection │   │     Incoming     │
//!       │ (auth, channels) │   │ (authenticated)  │
//!       └────────┬─────────┘   └────────┬─────────┘
//!                ▼                      ▼
//!          Box<dyn Channel>       Box<dyn Channel>
//! ```
//!
//! [`StreamChannel`] implements [`Channel`] over any tokio byte
//! stream and [`memory`] provides a loopback transport for tests and demos.

mod framing;
pub mod memory;
mod stream;

pub use framing::{FrameDecoder, Framing, EOM_MARKER, MAX_CHUNK_SIZE};
pub use stream::StreamChannel;

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{watch, Mutex};

use crate::error::Result;
use crate::protocol::{AuthMethod, AuthOutcome};

/// Link state published by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Channel is open
    Up,
    /// Peer closed the stream
    Eof,
    /// Stream failed
    Reset,
}

impl LinkState {
    /// Whether the link can no longer carry messages.
    pub fn is_down(self) -> bool {
        self != LinkState::Up
    }
}

/// One framed, bidirectional message stream carrying one NETCONF session.
pub trait Channel: Send {
    /// Send one complete message using the current outbound framing.
    fn send<'a>(&'a mut self, message: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Receive the next complete message. `Ok(None)` means end of stream.
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<String>>>;

    /// Switch outbound framing (after the hello exchange).
    fn set_framing(&mut self, framing: Framing);

    /// Subscribe to link state changes.
    fn link(&self) -> watch::Receiver<LinkState>;

    /// Flush and close the outbound half.
    fn shutdown(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// SSH user authentication, driven by [`crate::protocol::AuthNegotiator`].
pub trait UserAuth: Send {
    /// Methods the server currently accepts for `user`.
    fn auth_methods<'a>(&'a mut self, user: &'a str) -> BoxFuture<'a, Result<Vec<AuthMethod>>>;

    /// Attempt one method. Credentials are the transport's concern.
    fn authenticate<'a>(
        &'a mut self,
        user: &'a str,
        method: AuthMethod,
    ) -> BoxFuture<'a, Result<AuthOutcome>>;
}

/// A connected transport able to carry several channels.
pub trait Connection: UserAuth {
    /// Open a new channel running the NETCONF subsystem.
    fn open_channel(&mut self) -> BoxFuture<'_, Result<Box<dyn Channel>>>;
}

/// Client side entry point of a transport.
pub trait Connector: Send + Sync {
    /// Open a transport connection to `host:port`.
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<Box<dyn Connection>>>;
}

/// An authenticated channel accepted by a server transport.
pub struct Incoming {
    /// Channel carrying the new session
    pub channel: Box<dyn Channel>,
    /// Remote host
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Authenticated user
    pub user: String,
}

impl fmt::Debug for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incoming")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Server side entry point of a transport.
pub trait Listener: Send {
    /// Wait for the next authenticated channel.
    fn accept(&mut self) -> BoxFuture<'_, Result<Incoming>>;
}

/// An authenticated connection shared by the sessions multiplexed over it.
///
/// Channel opens are serialized behind an async mutex; everything after the
/// open is owned by the individual session. The connection is released when
/// the last clone is dropped.
#[derive(Clone)]
pub struct SharedConnection {
    inner: Arc<Mutex<Box<dyn Connection>>>,
    host: Arc<str>,
    port: u16,
    user: Arc<str>,
}

impl SharedConnection {
    /// Wrap an authenticated connection.
    pub fn new(connection: Box<dyn Connection>, host: &str, port: u16, user: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(connection)),
            host: host.into(),
            port,
            user: user.into(),
        }
    }

    /// Open another channel on this connection.
    pub async fn open_channel(&self) -> Result<Box<dyn Channel>> {
        let mut connection = self.inner.lock().await;
        connection.open_channel().await
    }

    /// Remote host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Remote port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Authenticated user
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Number of live handles (sessions plus the caller's own clones).
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for SharedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedConnection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}
