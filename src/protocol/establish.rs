//! Session establishment for both ends.
//!
//! ```text
//! Client                                   Server
//!   │ connect + SSH user auth                 │
//!   │────────────────────────────────────────▶│ Listener::accept
//!   │ open channel (netconf subsystem)        │ lease session id
//!   │── <hello> caps ───────────▶  ◀───────── │── <hello> caps + session-id
//!   │ negotiate                               │ negotiate
//!   │ chunked framing if base 1.1             │ chunked framing if base 1.1
//!   ▼ Session (Working)                       ▼ Session (Working)
//! ```
//!
//! Both peers send their hello before reading the other one. Nothing is
//! returned until negotiation has succeeded; on failure every resource
//! acquired so far (connection, channel, session-id lease) is dropped before
//! the error is returned.

use std::sync::Arc;
use std::time::Duration;

use super::auth::{AuthNegotiator, AuthPreferences};
use super::message::Hello;
use super::registry::SessionRegistry;
use super::session::{Established, Lifecycle, Session, SessionConfig, Side, StateCell};
use super::{BaseVersion, Capabilities, NegotiatedCaps};
use crate::error::{NetconfError, Result};
use crate::transport::{Channel, Connector, Framing, Incoming, Listener, SharedConnection};

/// Send our hello and wait for the peer's, within `limit`.
async fn exchange_hellos(channel: &mut dyn Channel, ours: &Hello, limit: Duration) -> Result<Hello> {
    let exchange = async {
        channel.send(&ours.to_xml()).await?;
        tracing::debug!("Hello sent ({} capabilities)", ours.capabilities.len());
        match channel.recv().await? {
            Some(xml) => Hello::from_xml(&xml),
            None => Err(NetconfError::Transport(
                "connection closed before hello".to_string(),
            )),
        }
    };

    // A missing hello is a bad hello, not a plain timeout.
    let theirs = tokio::time::timeout(limit, exchange)
        .await
        .map_err(|_| NetconfError::Negotiation(format!("no hello received within {:?}", limit)))??;
    tracing::debug!("Hello received ({} capabilities)", theirs.capabilities.len());
    Ok(theirs)
}

/// Switch to chunked framing once both peers speak base 1.1.
fn apply_framing(channel: &mut dyn Channel, version: BaseVersion) {
    if version == BaseVersion::V1_1 {
        channel.set_framing(Framing::Chunked);
    }
}

/// Record a failed establishment on its state cell.
fn fail(state: &StateCell, side: Side, err: NetconfError) -> NetconfError {
    state.transition(Lifecycle::Error(err.termination_reason()));
    tracing::warn!("{:?} session establishment failed: {}", side, err);
    err
}

/// Client end: connects, authenticates and negotiates sessions.
#[derive(Clone)]
pub struct Client {
    connector: Arc<dyn Connector>,
    auth: AuthPreferences,
    capabilities: Capabilities,
    config: SessionConfig,
}

impl Client {
    /// Client using the default capability set and auth preferences.
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Arc::new(connector),
            auth: AuthPreferences::default(),
            capabilities: Capabilities::default_set(),
            config: SessionConfig::default(),
        }
    }

    /// Set SSH auth method preferences.
    pub fn with_auth(mut self, auth: AuthPreferences) -> Self {
        self.auth = auth;
        self
    }

    /// Replace the advertised capability set.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set session time bounds.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Capabilities advertised in the client hello.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Connect, authenticate and establish one session.
    pub async fn connect(&self, host: &str, port: u16, user: &str) -> Result<Session> {
        let connection = self.open_connection(host, port, user).await?;
        self.connect_channel(&connection).await
    }

    /// Connect and authenticate without opening a session.
    ///
    /// The returned connection can carry several sessions through
    /// [`Client::connect_channel`].
    pub async fn open_connection(&self, host: &str, port: u16, user: &str) -> Result<SharedConnection> {
        let limit = self.config.connect_timeout;
        tracing::info!("Connecting to {}:{} as {}", host, port, user);

        let setup = async {
            let mut connection = self.connector.connect(host, port).await?;
            AuthNegotiator::new(self.auth.clone())
                .authenticate(connection.as_mut(), user)
                .await?;
            Ok::<_, NetconfError>(connection)
        };
        let connection = tokio::time::timeout(limit, setup)
            .await
            .map_err(|_| {
                NetconfError::Timeout(format!("connect to {}:{} exceeded {:?}", host, port, limit))
            })??;

        Ok(SharedConnection::new(connection, host, port, user))
    }

    /// Establish a session on a new channel of an existing connection.
    pub async fn connect_channel(&self, connection: &SharedConnection) -> Result<Session> {
        let state = StateCell::new();
        let mut channel = connection
            .open_channel()
            .await
            .map_err(|e| fail(&state, Side::Client, e))?;

        let (id, negotiated) = self
            .handshake(channel.as_mut())
            .await
            .map_err(|e| fail(&state, Side::Client, e))?;
        apply_framing(channel.as_mut(), negotiated.version);

        Ok(Session::start(Established {
            side: Side::Client,
            id,
            version: negotiated.version,
            capabilities: negotiated.capabilities,
            notification_allowed: negotiated.notification_allowed,
            host: connection.host().to_string(),
            port: connection.port(),
            user: connection.user().to_string(),
            channel,
            state,
            config: self.config.clone(),
            connection: Some(connection.clone()),
            lease: None,
        }))
    }

    async fn handshake(&self, channel: &mut dyn Channel) -> Result<(u32, NegotiatedCaps)> {
        let ours = Hello::client(self.capabilities.clone());
        let theirs = exchange_hellos(channel, &ours, self.config.hello_timeout).await?;
        let id = theirs.session_id.ok_or_else(|| {
            NetconfError::Negotiation("server hello has no session-id".to_string())
        })?;
        let negotiated = self.capabilities.negotiate(&theirs.capabilities)?;
        tracing::debug!("Negotiated base {} for session {}", negotiated.version, id);
        Ok((id, negotiated))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("auth", &self.auth)
            .field("capabilities", &self.capabilities.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Server end: accepts channels and negotiates sessions.
#[derive(Debug, Clone)]
pub struct Server {
    capabilities: Capabilities,
    config: SessionConfig,
    registry: SessionRegistry,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Server advertising the default capability set.
    pub fn new() -> Self {
        Self {
            capabilities: Capabilities::default_set(),
            config: SessionConfig::default(),
            registry: SessionRegistry::new(),
        }
    }

    /// Replace the advertised capability set.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set session time bounds.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Capabilities advertised in the server hello.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Sessions holding a session id (established and not yet terminated).
    pub fn active_sessions(&self) -> usize {
        self.registry.active()
    }

    /// Session-id registry shared by clones of this server.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Wait for the next authenticated channel and establish a session on it.
    pub async fn accept<L: Listener + ?Sized>(&self, listener: &mut L) -> Result<Session> {
        let incoming = listener.accept().await?;
        self.establish(incoming).await
    }

    /// Establish a session on an already accepted channel.
    ///
    /// Lets a server accept in one task and run hello exchanges concurrently.
    pub async fn establish(&self, incoming: Incoming) -> Result<Session> {
        let Incoming {
            mut channel,
            host,
            port,
            user,
        } = incoming;
        let state = StateCell::new();
        let lease = self.registry.lease().map_err(|e| fail(&state, Side::Server, e))?;
        tracing::debug!("Accepted channel from {}@{}:{} as session {}", user, host, port, lease.id());

        let ours = Hello::server(self.capabilities.clone(), lease.id());
        let negotiated = self
            .handshake(channel.as_mut(), &ours)
            .await
            .map_err(|e| fail(&state, Side::Server, e))?;
        apply_framing(channel.as_mut(), negotiated.version);

        Ok(Session::start(Established {
            side: Side::Server,
            id: lease.id(),
            version: negotiated.version,
            capabilities: negotiated.capabilities,
            notification_allowed: negotiated.notification_allowed,
            host,
            port,
            user,
            channel,
            state,
            config: self.config.clone(),
            connection: None,
            lease: Some(lease),
        }))
    }

    async fn handshake(&self, channel: &mut dyn Channel, ours: &Hello) -> Result<NegotiatedCaps> {
        let theirs = exchange_hellos(channel, ours, self.config.hello_timeout).await?;
        if let Some(id) = theirs.session_id {
            return Err(NetconfError::Negotiation(format!(
                "client hello carries session-id {}",
                id
            )));
        }
        let negotiated = self.capabilities.negotiate(&theirs.capabilities)?;
        tracing::debug!("Negotiated base {}", negotiated.version);
        Ok(negotiated)
    }
}
