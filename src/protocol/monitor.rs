//! Read-only session views for monitoring.
//!
//! [`SessionMonitor`] is a serializable snapshot of a live [`Session`] or a
//! [`DummySession`]. A dummy session describes a session known only by its
//! metadata (for example one reported by `ietf-netconf-monitoring`); it owns
//! no channel and offers no I/O operations.
//!
//! [`Session`]: super::Session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::{Side, Status, TerminationReason};
use super::{BaseVersion, Capabilities};
use crate::error::Result;

/// Anything that can produce a monitoring snapshot.
pub trait SessionView {
    /// Current snapshot.
    fn monitor(&self) -> SessionMonitor;

    /// Status at the time of the call.
    fn status(&self) -> Status {
        self.monitor().status
    }
}

/// Snapshot of a session's metadata and counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMonitor {
    /// Session ID
    pub id: u32,
    /// Local end, unknown for dummy sessions
    pub side: Option<Side>,
    /// Remote host
    pub host: String,
    /// Remote port
    pub port: Option<u16>,
    /// User name
    pub user: String,
    /// Negotiated base version
    pub version: Option<BaseVersion>,
    /// Capability URIs
    pub capabilities: Vec<String>,
    /// Status
    pub status: Status,
    /// Set once terminal
    pub termination_reason: Option<TerminationReason>,
    /// Peer advertised `:notification`
    pub notification_allowed: bool,
    /// When the session reached `Working`
    pub login_time: Option<DateTime<Utc>>,
    /// RPCs (or replies) received
    pub rpcs_in: u64,
    /// RPCs (or replies) sent
    pub rpcs_out: u64,
}

impl SessionMonitor {
    /// Pretty JSON rendering.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Metadata describing a session this process does not own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMetadata {
    /// Session ID
    pub id: u32,
    /// Host
    pub host: String,
    /// Port, if known
    pub port: Option<u16>,
    /// User name
    pub user: String,
    /// Capabilities the session uses
    pub capabilities: Capabilities,
}

impl SessionMetadata {
    /// Metadata with the given id and user; host, port and capabilities unset.
    pub fn new(id: u32, user: &str) -> Self {
        Self {
            id,
            host: String::new(),
            port: None,
            user: user.to_string(),
            capabilities: Capabilities::new(),
        }
    }

    /// Set the host.
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the capabilities.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Metadata-only session. Its status is always [`Status::Dummy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummySession {
    metadata: SessionMetadata,
}

impl DummySession {
    /// Wrap metadata.
    pub fn new(metadata: SessionMetadata) -> Self {
        Self { metadata }
    }

    /// Always [`Status::Dummy`].
    pub fn status(&self) -> Status {
        Status::Dummy
    }

    /// Session ID
    pub fn id(&self) -> u32 {
        self.metadata.id
    }

    /// Host
    pub fn host(&self) -> &str {
        &self.metadata.host
    }

    /// Port, if known
    pub fn port(&self) -> Option<u16> {
        self.metadata.port
    }

    /// User name
    pub fn user(&self) -> &str {
        &self.metadata.user
    }

    /// Capabilities
    pub fn capabilities(&self) -> &Capabilities {
        &self.metadata.capabilities
    }

    /// Highest base version among the capabilities.
    pub fn version(&self) -> Option<BaseVersion> {
        self.metadata.capabilities.highest_base_version()
    }

    /// Whether `:notification` is among the capabilities.
    pub fn notification_allowed(&self) -> bool {
        self.metadata.capabilities.supports_notifications()
    }

    /// Dummy sessions never terminate.
    pub fn termination_reason(&self) -> Option<TerminationReason> {
        None
    }

    /// Snapshot for monitoring.
    pub fn monitor(&self) -> SessionMonitor {
        SessionMonitor {
            id: self.id(),
            side: None,
            host: self.metadata.host.clone(),
            port: self.metadata.port,
            user: self.metadata.user.clone(),
            version: self.version(),
            capabilities: self.metadata.capabilities.to_vec(),
            status: Status::Dummy,
            termination_reason: None,
            notification_allowed: self.notification_allowed(),
            login_time: None,
            rpcs_in: 0,
            rpcs_out: 0,
        }
    }
}

impl SessionView for DummySession {
    fn monitor(&self) -> SessionMonitor {
        DummySession::monitor(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CAP_NOTIFICATION;

    #[test]
    fn test_dummy_session_metadata() {
        let caps = Capabilities::new()
            .with(BaseVersion::V1_0.uri())
            .with(BaseVersion::V1_1.uri())
            .with(CAP_NOTIFICATION);
        let dummy = DummySession::new(
            SessionMetadata::new(42, "operator")
                .with_host("10.0.0.7")
                .with_capabilities(caps),
        );

        assert_eq!(dummy.status(), Status::Dummy);
        assert_eq!(dummy.id(), 42);
        assert_eq!(dummy.user(), "operator");
        assert_eq!(dummy.host(), "10.0.0.7");
        assert_eq!(dummy.port(), None);
        assert_eq!(dummy.version(), Some(BaseVersion::V1_1));
        assert!(dummy.notification_allowed());
        assert_eq!(dummy.termination_reason(), None);
    }

    #[test]
    fn test_monitor_json() {
        let dummy = DummySession::new(SessionMetadata::new(3, "ro").with_port(830));
        let view: &dyn SessionView = &dummy;
        assert_eq!(view.status(), Status::Dummy);

        let json = view.monitor().to_json().unwrap();
        assert!(json.contains("\"status\": \"dummy\""));
        assert!(json.contains("\"port\": 830"));

        let back: SessionMonitor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dummy.monitor());
    }
}
