//! NETCONF session object and lifecycle.
//!
//! A [`Session`] is only handed out once the hello exchange succeeded, so the
//! caller always starts in `Working`. From there it moves to a terminal state
//! through [`Session::close`], [`Session::kill`], a transport drop or the
//! idle timeout. The last two are noticed by a per-session watchdog task, so
//! [`Session::status`] changes without any caller action. Reaching a
//! terminal state releases the transport at once, whoever caused it.
//!
//! ```text
//! Startup ──hello ok──▶ Working ──close──▶ Closing ──▶ Closed(closed)
//!    │                     │
//!    │ bad hello           ├── kill ─────────────────▶ Closed(killed)
//!    ▼                     ├── link down ────────────▶ Closed(connection-dropped)
//!  Error(bad-hello)        ├── idle ─────────────────▶ Closed(timeout)
//!                          └── protocol violation ───▶ Error(other)
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::message::{parse_reply, parse_rpc, reply_envelope, rpc_envelope, Rpc, RpcReply, CLOSE_SESSION, OK};
use super::monitor::{SessionMonitor, SessionView};
use super::registry::IdLease;
use super::{BaseVersion, Capabilities, MessageId, MessageIdAllocator};
use crate::error::{NetconfError, Result};
use crate::transport::{Channel, LinkState, SharedConnection};

/// Externally visible session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Hello exchange in progress
    Startup,
    /// Ready for RPCs
    Working,
    /// Graceful close in progress
    Closing,
    /// Terminated
    Closed,
    /// Establishment failed
    Error,
    /// Metadata-only session
    Dummy,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Startup => "STARTUP",
            Status::Working => "WORKING",
            Status::Closing => "CLOSING",
            Status::Closed => "CLOSED",
            Status::Error => "ERROR",
            Status::Dummy => "DUMMY",
        };
        f.write_str(name)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    /// Graceful close by either peer
    Closed,
    /// Killed locally or by `<kill-session>`
    Killed,
    /// Transport went away
    ConnectionDropped,
    /// Inactivity or close bound exceeded
    Timeout,
    /// Hello exchange failed
    BadHello,
    /// Anything else
    Other,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminationReason::Closed => "closed",
            TerminationReason::Killed => "killed",
            TerminationReason::ConnectionDropped => "connection-dropped",
            TerminationReason::Timeout => "timeout",
            TerminationReason::BadHello => "bad-hello",
            TerminationReason::Other => "other",
        };
        f.write_str(name)
    }
}

/// Which end of the session this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Sends RPCs
    Client,
    /// Answers RPCs
    Server,
}

/// Internal state; terminal variants carry their reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Startup,
    Working,
    Closing,
    Closed(TerminationReason),
    Error(TerminationReason),
}

impl Lifecycle {
    pub(crate) fn status(self) -> Status {
        match self {
            Lifecycle::Startup => Status::Startup,
            Lifecycle::Working => Status::Working,
            Lifecycle::Closing => Status::Closing,
            Lifecycle::Closed(_) => Status::Closed,
            Lifecycle::Error(_) => Status::Error,
        }
    }

    pub(crate) fn reason(self) -> Option<TerminationReason> {
        match self {
            Lifecycle::Closed(reason) | Lifecycle::Error(reason) => Some(reason),
            _ => None,
        }
    }

    pub(crate) fn is_terminal(self) -> bool {
        self.reason().is_some()
    }

    /// Transition table.
    fn permits(self, next: Lifecycle) -> bool {
        use Lifecycle::*;
        match (self, next) {
            (Startup, Working | Error(_)) => true,
            (Working, Closing | Error(_)) => true,
            // A graceful close always passes through Closing.
            (Startup | Working, Closed(reason)) => reason != TerminationReason::Closed,
            (Closing, Closed(_) | Error(_)) => true,
            _ => false,
        }
    }
}

/// Shared lifecycle cell read by the session, its watchdog and status watchers.
pub(crate) struct StateCell {
    lifecycle: watch::Sender<Lifecycle>,
    epoch: Instant,
    last_activity_ms: AtomicU64,
}

impl StateCell {
    pub(crate) fn new() -> Arc<Self> {
        let (lifecycle, _) = watch::channel(Lifecycle::Startup);
        Arc::new(Self {
            lifecycle,
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
        })
    }

    pub(crate) fn get(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Apply `next` if the transition table allows it.
    pub(crate) fn transition(&self, next: Lifecycle) -> bool {
        self.transition_from(None, next)
    }

    /// Apply `next` only if the current status is `expected`.
    pub(crate) fn transition_if(&self, expected: Status, next: Lifecycle) -> bool {
        self.transition_from(Some(expected), next)
    }

    fn transition_from(&self, expected: Option<Status>, next: Lifecycle) -> bool {
        self.lifecycle.send_if_modified(|current| {
            if expected.is_some_and(|status| current.status() != status) || !current.permits(next) {
                return false;
            }
            tracing::debug!("Session state {:?} -> {:?}", current, next);
            *current = next;
            true
        })
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    pub(crate) fn touch(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_activity_ms.store(now, Ordering::Relaxed);
    }

    pub(crate) fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(last)
    }
}

/// Time bounds applied to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Bound on receiving the peer's hello
    pub hello_timeout: Duration,
    /// Bound on the close-session exchange
    pub close_timeout: Duration,
    /// Bound on transport connect and authentication
    pub connect_timeout: Duration,
    /// Close a working session after this much inactivity
    pub idle_timeout: Option<Duration>,
    /// Message-id wrap bound
    pub msgid_limit: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hello_timeout: Duration::from_secs(super::HELLO_TIMEOUT_SECS),
            close_timeout: Duration::from_secs(super::CLOSE_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(super::CONNECT_TIMEOUT_SECS),
            idle_timeout: None,
            msgid_limit: super::DEFAULT_MSGID_LIMIT,
        }
    }
}

impl SessionConfig {
    /// Set the hello bound.
    pub fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }

    /// Set the close-session bound.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Enable the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set the message-id wrap bound.
    pub fn with_msgid_limit(mut self, limit: u64) -> Self {
        self.msgid_limit = limit;
        self
    }
}

/// Cloneable observer of a session's status, usable from other tasks.
#[derive(Clone)]
pub struct StatusWatch {
    rx: watch::Receiver<Lifecycle>,
}

impl StatusWatch {
    /// Current status.
    pub fn status(&self) -> Status {
        self.rx.borrow().status()
    }

    /// Termination reason, once terminal.
    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.rx.borrow().reason()
    }

    /// Wait until the session is terminal and return why it ended.
    pub async fn terminated(&mut self) -> TerminationReason {
        let reason = match self.rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => state.reason(),
            Err(_) => None,
        };
        reason
            .or_else(|| self.rx.borrow().reason())
            .unwrap_or(TerminationReason::Other)
    }
}

impl fmt::Debug for StatusWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusWatch")
            .field("status", &self.status())
            .finish()
    }
}

/// Everything the establisher hands over once negotiation succeeded.
pub(crate) struct Established {
    pub side: Side,
    pub id: u32,
    pub version: BaseVersion,
    pub capabilities: Capabilities,
    pub notification_allowed: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub channel: Box<dyn Channel>,
    pub state: Arc<StateCell>,
    pub config: SessionConfig,
    pub connection: Option<SharedConnection>,
    pub lease: Option<IdLease>,
}

/// Transport resources held by a live session.
struct Attachment {
    channel: Box<dyn Channel>,
    // Keeps the transport connection alive for client sessions.
    _connection: Option<SharedConnection>,
    _lease: Option<IdLease>,
}

/// A session's [`Attachment`] slot, shared with its watchdog.
///
/// Terminal transitions made through [`Binding::end`] empty the slot under
/// the same lock, so a session that reached `Closed` or `Error` no longer
/// holds a channel, a connection handle or a session id.
#[derive(Clone)]
struct Binding {
    state: Arc<StateCell>,
    slot: Arc<Mutex<Option<Attachment>>>,
}

impl Binding {
    fn new(state: Arc<StateCell>, attachment: Attachment) -> Self {
        Self {
            state,
            slot: Arc::new(Mutex::new(Some(attachment))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Attachment>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the transport out for one operation.
    fn checkout(&self) -> Result<Checkout> {
        let attachment = self.lock().take().ok_or_else(no_channel)?;
        Ok(Checkout {
            binding: self.clone(),
            attachment: Some(attachment),
        })
    }

    /// Move to `next` (only from `expected`, if given) and release the
    /// transport in the same step.
    fn end(&self, expected: Option<Status>, next: Lifecycle) -> bool {
        let released = {
            let mut slot = self.lock();
            if !self.state.transition_from(expected, next) {
                return false;
            }
            slot.take()
        };
        drop(released);
        true
    }

    /// Move `Working -> Closing` and hand the transport to the close flow.
    fn begin_close(&self) -> Option<Closing> {
        let attachment = {
            let mut slot = self.lock();
            if !self.state.transition_if(Status::Working, Lifecycle::Closing) {
                return None;
            }
            slot.take()
        };
        Some(Closing {
            binding: self.clone(),
            attachment,
        })
    }
}

fn no_channel() -> NetconfError {
    NetconfError::Usage("session has no channel".to_string())
}

/// Transport borrowed for one operation. Returned to the slot on drop,
/// or dropped with it if the session ended in the meantime.
struct Checkout {
    binding: Binding,
    attachment: Option<Attachment>,
}

impl Checkout {
    fn channel(&mut self) -> Result<&mut Box<dyn Channel>> {
        self.attachment
            .as_mut()
            .map(|attachment| &mut attachment.channel)
            .ok_or_else(no_channel)
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if let Some(attachment) = self.attachment.take() {
            let mut slot = self.binding.lock();
            if !self.binding.state.get().is_terminal() {
                *slot = Some(attachment);
            }
        }
    }
}

/// A graceful close in progress.
///
/// Dropped before [`Closing::finish`] (for example when the `close` future
/// is cancelled) it records `Closed(other)` and releases the transport.
struct Closing {
    binding: Binding,
    attachment: Option<Attachment>,
}

impl Closing {
    fn channel(&mut self) -> Result<&mut Box<dyn Channel>> {
        self.attachment
            .as_mut()
            .map(|attachment| &mut attachment.channel)
            .ok_or_else(no_channel)
    }

    async fn finish(mut self, reason: TerminationReason) {
        self.binding.state.transition(Lifecycle::Closed(reason));
        if let Some(mut attachment) = self.attachment.take() {
            if let Err(e) = attachment.channel.shutdown().await {
                tracing::debug!("Channel shutdown after close: {}", e);
            }
        }
    }
}

impl Drop for Closing {
    fn drop(&mut self) {
        if self
            .binding
            .state
            .transition_if(Status::Closing, Lifecycle::Closed(TerminationReason::Other))
        {
            tracing::warn!("Close interrupted, transport released");
        }
    }
}

/// Run `op` unless the session terminates first.
async fn unless_ended<T>(
    state: &StateCell,
    id: u32,
    op: impl Future<Output = Result<T>>,
) -> Result<T> {
    let mut lifecycle = state.subscribe();
    tokio::select! {
        biased;
        result = op => result,
        _ = async { let _ = lifecycle.wait_for(|s| s.is_terminal()).await; } => {
            Err(NetconfError::Usage(format!("session {} ended", id)))
        },
    }
}

/// An established NETCONF session.
///
/// Owns its channel exclusively. Dropping the session (or calling
/// [`Session::free`]) releases the channel, the watchdog task and, on a
/// server, the session-id lease. A session that terminates on its own
/// (transport drop, idle timeout, protocol error) releases them right away.
pub struct Session {
    side: Side,
    id: u32,
    version: BaseVersion,
    capabilities: Capabilities,
    notification_allowed: bool,
    host: String,
    port: u16,
    user: String,
    login_time: DateTime<Utc>,
    state: Arc<StateCell>,
    binding: Binding,
    msgids: MessageIdAllocator,
    config: SessionConfig,
    watchdog: Option<JoinHandle<()>>,
    rpcs_in: u64,
    rpcs_out: u64,
}

impl Session {
    /// Move a negotiated session to `Working` and start its watchdog.
    pub(crate) fn start(parts: Established) -> Self {
        let Established {
            side,
            id,
            version,
            capabilities,
            notification_allowed,
            host,
            port,
            user,
            channel,
            state,
            config,
            connection,
            lease,
        } = parts;

        state.touch();
        state.transition(Lifecycle::Working);
        let link = channel.link();
        let binding = Binding::new(
            Arc::clone(&state),
            Attachment {
                channel,
                _connection: connection,
                _lease: lease,
            },
        );
        let watchdog = spawn_watchdog(binding.clone(), link, config.idle_timeout);

        tracing::info!(
            "NETCONF session {} established ({:?}, base {}, {}@{}:{})",
            id,
            side,
            version,
            user,
            host,
            port
        );

        Self {
            side,
            id,
            version,
            capabilities,
            notification_allowed,
            host,
            port,
            user,
            login_time: Utc::now(),
            state,
            binding,
            msgids: MessageIdAllocator::with_limit(config.msgid_limit),
            config,
            watchdog: Some(watchdog),
            rpcs_in: 0,
            rpcs_out: 0,
        }
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.state.get().status()
    }

    /// Why the session ended; `None` while it is still live.
    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.state.get().reason()
    }

    /// Session id assigned by the server.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Negotiated base version.
    pub fn version(&self) -> BaseVersion {
        self.version
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

    /// Negotiated capabilities. Read-only for the session's lifetime.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Whether the peer advertised `:notification`.
    pub fn notification_allowed(&self) -> bool {
        self.notification_allowed
    }

    /// Local end of the session.
    pub fn side(&self) -> Side {
        self.side
    }

    /// When the session reached `Working`.
    pub fn login_time(&self) -> DateTime<Utc> {
        self.login_time
    }

    /// Observer handle for other tasks.
    pub fn watch_status(&self) -> StatusWatch {
        StatusWatch {
            rx: self.state.subscribe(),
        }
    }

    /// Read-only snapshot for monitoring.
    pub fn monitor(&self) -> SessionMonitor {
        SessionMonitor {
            id: self.id,
            side: Some(self.side),
            host: self.host.clone(),
            port: Some(self.port),
            user: self.user.clone(),
            version: Some(self.version),
            capabilities: self.capabilities.to_vec(),
            status: self.status(),
            termination_reason: self.termination_reason(),
            notification_allowed: self.notification_allowed,
            login_time: Some(self.login_time),
            rpcs_in: self.rpcs_in,
            rpcs_out: self.rpcs_out,
        }
    }

    /// Send an RPC tagged with a fresh message id (client side).
    pub async fn send_rpc(&mut self, body: &str) -> Result<MessageId> {
        self.ensure(Side::Client)?;
        let id = self.msgids.allocate()?;
        let xml = rpc_envelope(id, body);
        if let Err(e) = self.channel_send(&xml).await {
            self.msgids.complete(id);
            return Err(e);
        }
        self.rpcs_out += 1;
        tracing::trace!("Session {} sent rpc {}", self.id, id);
        Ok(id)
    }

    /// Receive the next reply and retire its message id (client side).
    ///
    /// A reply that cannot be parsed or answers no outstanding RPC ends the
    /// session in `Error` with reason `other`.
    pub async fn recv_reply(&mut self) -> Result<RpcReply> {
        self.ensure(Side::Client)?;
        let xml = self.channel_recv().await?;
        let reply = parse_reply(&xml).map_err(|e| self.fault(e))?;
        if !self.msgids.complete(reply.message_id) {
            return Err(self.fault(NetconfError::Protocol(format!(
                "reply to unknown message-id {}",
                reply.message_id
            ))));
        }
        self.rpcs_in += 1;
        Ok(reply)
    }

    /// Number of RPCs still waiting for a reply.
    pub fn outstanding_rpcs(&self) -> usize {
        self.msgids.outstanding()
    }

    /// Receive the next RPC (server side).
    ///
    /// A `<close-session/>` is answered with `<ok/>` and closes the session;
    /// `Ok(None)` is returned in that case.
    pub async fn recv_rpc(&mut self) -> Result<Option<Rpc>> {
        self.ensure(Side::Server)?;
        let xml = self.channel_recv().await?;
        let rpc = parse_rpc(&xml).map_err(|e| self.fault(e))?;
        self.rpcs_in += 1;

        if rpc.is_close_session() {
            tracing::info!("Session {} received close-session", self.id);
            if let Some(mut closing) = self.binding.begin_close() {
                let reply = reply_envelope(&rpc.message_id, OK);
                if let Ok(channel) = closing.channel() {
                    if channel.send(&reply).await.is_ok() {
                        self.rpcs_out += 1;
                    }
                }
                closing.finish(TerminationReason::Closed).await;
                self.abort_watchdog();
            }
            return Ok(None);
        }
        Ok(Some(rpc))
    }

    /// Answer `rpc` with `body` (server side).
    pub async fn send_reply(&mut self, rpc: &Rpc, body: &str) -> Result<()> {
        self.ensure(Side::Server)?;
        self.channel_send(&reply_envelope(&rpc.message_id, body)).await?;
        self.rpcs_out += 1;
        Ok(())
    }

    /// Gracefully close the session. A no-op unless `Working`.
    ///
    /// A client sends `<close-session/>` and waits for the reply within the
    /// close bound; the session ends `Closed` whatever the outcome, and the
    /// error (if any) is returned. Cancelling the returned future still
    /// ends the session, with reason `other`.
    pub async fn close(&mut self) -> Result<()> {
        let Some(mut closing) = self.binding.begin_close() else {
            return Ok(());
        };
        tracing::info!("Closing session {}", self.id);

        let outcome = match self.side {
            Side::Client => self.close_exchange(&mut closing).await,
            Side::Server => Ok(()),
        };
        let reason = match &outcome {
            Ok(()) => TerminationReason::Closed,
            Err(e) => {
                tracing::warn!("Session {} close-session failed: {}", self.id, e);
                e.termination_reason()
            },
        };
        closing.finish(reason).await;
        self.abort_watchdog();
        outcome
    }

    async fn close_exchange(&mut self, closing: &mut Closing) -> Result<()> {
        let limit = self.config.close_timeout;
        let id = self.msgids.allocate()?;
        let channel = closing.channel()?;

        tokio::time::timeout(limit, close_session_exchange(channel.as_mut(), id))
            .await
            .map_err(|_| {
                NetconfError::Timeout(format!("no reply to close-session within {:?}", limit))
            })?
    }

    /// Terminate immediately with reason `killed`.
    pub fn kill(&mut self) {
        if self
            .binding
            .end(None, Lifecycle::Closed(TerminationReason::Killed))
        {
            tracing::info!("Session {} killed", self.id);
        }
        self.abort_watchdog();
    }

    /// Release the session. Equivalent to dropping it.
    pub fn free(self) {}

    fn ensure(&self, side: Side) -> Result<()> {
        if self.side != side {
            return Err(NetconfError::Usage(format!(
                "operation not available on a {:?} session",
                self.side
            )));
        }
        match self.state.get() {
            Lifecycle::Working => Ok(()),
            other => Err(NetconfError::Usage(format!(
                "session {} is {}",
                self.id,
                other.status()
            ))),
        }
    }

    async fn channel_send(&mut self, xml: &str) -> Result<()> {
        let mut checkout = self.binding.checkout()?;
        let result = unless_ended(&self.state, self.id, checkout.channel()?.send(xml)).await;
        drop(checkout);
        match result {
            Ok(()) => {
                self.state.touch();
                Ok(())
            },
            Err(e) => Err(self.fault(e)),
        }
    }

    async fn channel_recv(&mut self) -> Result<String> {
        let mut checkout = self.binding.checkout()?;
        let result = unless_ended(&self.state, self.id, checkout.channel()?.recv()).await;
        drop(checkout);
        match result {
            Ok(Some(xml)) => {
                self.state.touch();
                Ok(xml)
            },
            Ok(None) => Err(self.fault(NetconfError::Transport("connection closed by peer".to_string()))),
            Err(e) => Err(self.fault(e)),
        }
    }

    /// End a working session on a transport or protocol fault.
    fn fault(&mut self, err: NetconfError) -> NetconfError {
        let next = match err {
            NetconfError::Transport(_) | NetconfError::Io(_) => {
                Lifecycle::Closed(TerminationReason::ConnectionDropped)
            },
            NetconfError::Protocol(_) => Lifecycle::Error(TerminationReason::Other),
            _ => return err,
        };
        if self.binding.end(Some(Status::Working), next) {
            tracing::warn!("Session {} is {}: {}", self.id, next.status(), err);
            self.abort_watchdog();
        }
        err
    }

    fn abort_watchdog(&mut self) {
        if let Some(task) = self.watchdog.take() {
            task.abort();
        }
    }
}

impl SessionView for Session {
    fn monitor(&self) -> SessionMonitor {
        Session::monitor(self)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.abort_watchdog();
        self.binding
            .end(None, Lifecycle::Closed(TerminationReason::Other));
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("side", &self.side)
            .field("status", &self.status())
            .field("version", &self.version)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

async fn close_session_exchange(channel: &mut dyn Channel, id: MessageId) -> Result<()> {
    channel.send(&rpc_envelope(id, CLOSE_SESSION)).await?;
    loop {
        match channel.recv().await? {
            Some(xml) => match parse_reply(&xml) {
                Ok(reply) if reply.message_id == id => return Ok(()),
                _ => tracing::debug!("Discarding message while closing"),
            },
            None => {
                return Err(NetconfError::Transport(
                    "connection closed before close-session reply".to_string(),
                ))
            },
        }
    }
}

/// Watch the link and the idle bound of a working session, ending it (and
/// releasing its transport) when either fails.
fn spawn_watchdog(
    binding: Binding,
    mut link: watch::Receiver<LinkState>,
    idle: Option<Duration>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let state = Arc::clone(&binding.state);
        let mut lifecycle = state.subscribe();
        loop {
            let current = state.get();
            if current.is_terminal() {
                return;
            }
            if link.borrow_and_update().is_down() {
                if binding.end(
                    Some(Status::Working),
                    Lifecycle::Closed(TerminationReason::ConnectionDropped),
                ) {
                    tracing::warn!("Session transport dropped");
                }
                return;
            }

            // The idle bound only applies while working.
            let wait = match current {
                Lifecycle::Working => idle.map(|limit| limit.saturating_sub(state.idle_for())),
                _ => None,
            };
            tokio::select! {
                changed = link.changed() => {
                    // The reader publishes before it exits; an error here
                    // means the channel itself is gone.
                    if changed.is_err() {
                        return;
                    }
                },
                _ = lifecycle.changed() => {},
                _ = sleep_or_pending(wait) => {
                    if let Some(limit) = idle {
                        if state.idle_for() >= limit
                            && binding.end(
                                Some(Status::Working),
                                Lifecycle::Closed(TerminationReason::Timeout),
                            )
                        {
                            tracing::warn!("Session idle for {:?}, closing", limit);
                        }
                    }
                },
            }
        }
    })
}

async fn sleep_or_pending(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => futures::future::pending().await,
    }
}
