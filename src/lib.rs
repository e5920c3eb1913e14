//! # NETCONF session core
//!
//! Session establishment and capability negotiation for NETCONF (RFC 6241)
//! over a multiplexing secure transport such as SSH (RFC 6242).
//!
//! ## Features
//!
//! - **Capability sets**: ordered URIs with `?params`, defaults, intersection
//! - **SSH auth negotiation**: publickey, password and keyboard-interactive by priority
//! - **Hello exchange**: base 1.0/1.1 negotiation, session ids, chunked framing for 1.1
//! - **Session lifecycle**: close, kill, drop and idle detection with a recorded reason
//! - **Monitoring**: serializable snapshots of live and metadata-only sessions
//!
//! ## Architecture
//!
//! ```text
//!  Client::connect ─┐                          ┌─ Server::accept
//!                   ▼                          ▼
//!        AuthNegotiator ── transport::Connector / Listener
//!                   │                          │
//!                   └──── Hello exchange ──────┘
//!                          merge_intersection
//!                                 │
//!                                 ▼
//!                  Session (Working) ── watchdog (link, idle)
//!                                 │
//!                          SessionMonitor
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use netconf::protocol::{Client, Server};
//! use netconf::transport::memory::{self, AuthPolicy};
//!
//! let (connector, mut listener) = memory::pair(AuthPolicy::default());
//! let server = Server::new();
//! let client = Client::new(connector);
//!
//! let (server_session, client_session) = tokio::join!(
//!     server.accept(&mut listener),
//!     client.connect("router", 830, "admin"),
//! );
//! let mut session = client_session?;
//! let id = session.send_rpc("<get/>").await?;
//! session.close().await?;
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Capabilities, auth negotiation, sessions and establishment
//! - [`transport`]: Transport traits, framing, stream and loopback channels
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use config::Config;
pub use error::{NetconfError, Result};
pub use protocol::{
    AuthMethod, AuthPreferences, Capabilities, Client, DummySession, MessageId, Server, Session,
    SessionConfig, SessionMonitor, Status, TerminationReason,
};
pub use transport::{Channel, Connector, Listener, SharedConnection};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
