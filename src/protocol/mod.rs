//! NETCONF session establishment and capability negotiation.
//!
//! Implements the session layer of RFC 6241: SSH user authentication, the
//! `<hello>` exchange, base-version and capability negotiation, message-id
//! tagging, and the session lifecycle up to termination.
//!
//! # Protocol Overview
//!
//! ## Message Flow
//!
//! ```text
//! Client                                 Server
//!    |                                      |
//!    |====== SSH connect + user auth ======>|  publickey / password / interactive
//!    |====== open "netconf" channel =======>|
//!    |                                      |
//!    |-------- <hello> (caps) ------------->|  Both sides send without waiting
//!    |<------- <hello> (caps, session-id) --|
//!    |                                      |
//!    |-------- <rpc message-id="1"> ------->|  Chunked framing if base 1.1
//!    |<------- <rpc-reply message-id="1"> --|
//!    |                                      |
//!    |-------- <close-session/> ----------->|
//!    |<------- <ok/> -----------------------|
//! ```
//!
//! ## State Machine
//!
//! | State     | Description                        | Valid Transitions         |
//! |-----------|------------------------------------|---------------------------|
//! | `Startup` | Hello exchange in progress         | → Working, Error, Closed  |
//! | `Working` | Ready for RPCs                     | → Closing, Closed, Error  |
//! | `Closing` | close-session in progress          | → Closed, Error           |
//! | `Closed`  | Terminated, reason recorded        | (terminal)                |
//! | `Error`   | Bad hello or protocol violation    | (terminal)                |
//! | `Dummy`   | Metadata-only [`DummySession`]     | (terminal)                |
//!
//! ## Capabilities
//!
//! Negotiation keeps the highest base version both peers advertise plus every
//! optional capability of the peer that the local side also supports:
//!
//! - **Base**: `urn:ietf:params:netconf:base:1.0` and `:1.1`
//! - **Optional**: `:candidate`, `:startup`, `:notification:1.0`, ...
//! - **Parameters**: `?key=value&...` suffixes travel with the URI

mod auth;
mod capabilities;
mod establish;
mod message;
mod monitor;
mod msgid;
mod registry;
mod session;

pub use auth::{AuthMethod, AuthNegotiator, AuthOutcome, AuthPreferences};
pub use capabilities::{merge_intersection, BaseVersion, Capabilities, Capability, NegotiatedCaps};
pub use establish::{Client, Server};
pub use message::{
    parse_reply, parse_rpc, reply_envelope, rpc_envelope, Hello, Rpc, RpcReply, CLOSE_SESSION, OK,
};
pub use monitor::{DummySession, SessionMetadata, SessionMonitor, SessionView};
pub use msgid::{MessageId, MessageIdAllocator, DEFAULT_MSGID_LIMIT};
pub use registry::{IdLease, SessionRegistry};
pub use session::{Session, SessionConfig, Side, Status, StatusWatch, TerminationReason};

/// Prefix shared by the base capability URIs.
pub const BASE_PREFIX: &str = "urn:ietf:params:netconf:base:";

/// `:notification` capability (RFC 5277).
pub const CAP_NOTIFICATION: &str = "urn:ietf:params:netconf:capability:notification:1.0";

/// NETCONF XML namespace.
pub const NETCONF_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// IANA port for NETCONF over SSH.
pub const NETCONF_PORT: u16 = 830;

/// Default bound on receiving the peer's hello.
pub const HELLO_TIMEOUT_SECS: u64 = 30;

/// Default bound on the close-session exchange.
pub const CLOSE_TIMEOUT_SECS: u64 = 10;

/// Default bound on transport connect plus authentication.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;
