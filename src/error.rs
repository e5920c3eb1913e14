//! NETCONF session error types.
//!
//! Every establishment and lifecycle failure maps to one of a small set of
//! kinds. Establishment failures are reported to the caller and never leave a
//! half-built session behind; failures after a session is working are
//! recorded as its termination reason as well.

use thiserror::Error;

use crate::protocol::TerminationReason;

/// NETCONF session errors.
#[derive(Error, Debug)]
pub enum NetconfError {
    /// Connection refused, reset, or other transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Every preferred authentication method was exhausted.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Hello exchange failed: malformed hello or no common base version.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// An establishment, close, or liveness bound was exceeded.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Malformed exchange outside the hello.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Operation not valid for the session in its current state.
    #[error("Invalid usage: {0}")]
    Usage(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for NETCONF operations
pub type Result<T> = std::result::Result<T, NetconfError>;

impl NetconfError {
    /// Termination reason recorded for a session that failed with this error.
    pub fn termination_reason(&self) -> TerminationReason {
        match self {
            NetconfError::Negotiation(_) => TerminationReason::BadHello,
            NetconfError::Timeout(_) => TerminationReason::Timeout,
            NetconfError::Transport(_) | NetconfError::Io(_) => {
                TerminationReason::ConnectionDropped
            },
            _ => TerminationReason::Other,
        }
    }
}

impl From<toml::de::Error> for NetconfError {
    fn from(err: toml::de::Error) -> Self {
        NetconfError::Config(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for NetconfError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        NetconfError::Timeout(err.to_string())
    }
}
