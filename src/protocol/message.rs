//! Hello messages and RPC envelopes.
//!
//! The full NETCONF XML codec lives outside this crate. Session setup only
//! needs to write and read the `<hello>` element and to tag RPCs and replies
//! with their `message-id`, which is what this module does.

use lazy_static::lazy_static;
use regex::Regex;

use super::{Capabilities, MessageId, NETCONF_NS};
use crate::error::{NetconfError, Result};

lazy_static! {
    static ref HELLO_RE: Regex = Regex::new(r"<(?:[\w.-]+:)?hello[\s>/]").unwrap();
    static ref CAPABILITY_RE: Regex =
        Regex::new(r"<(?:[\w.-]+:)?capability>\s*([^<]*?)\s*</(?:[\w.-]+:)?capability>").unwrap();
    static ref SESSION_ID_RE: Regex =
        Regex::new(r"<(?:[\w.-]+:)?session-id>\s*([^<]*?)\s*</(?:[\w.-]+:)?session-id>").unwrap();
    static ref RPC_RE: Regex =
        Regex::new(r#"<(?:[\w.-]+:)?rpc\s[^>]*?\bmessage-id\s*=\s*["']([^"']*)["']"#).unwrap();
    static ref REPLY_RE: Regex =
        Regex::new(r#"<(?:[\w.-]+:)?rpc-reply\s[^>]*?\bmessage-id\s*=\s*["']([^"']*)["']"#)
            .unwrap();
    static ref CLOSE_SESSION_RE: Regex =
        Regex::new(r"<(?:[\w.-]+:)?close-session\s*(?:/>|>\s*</(?:[\w.-]+:)?close-session>)")
            .unwrap();
}

/// The first message each peer sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Advertised capabilities
    pub capabilities: Capabilities,
    /// Session id; present only in a server hello
    pub session_id: Option<u32>,
}

impl Hello {
    /// Client hello: capabilities only.
    pub fn client(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            session_id: None,
        }
    }

    /// Server hello carrying the assigned session id.
    pub fn server(capabilities: Capabilities, session_id: u32) -> Self {
        Self {
            capabilities,
            session_id: Some(session_id),
        }
    }

    /// Serialize to XML.
    pub fn to_xml(&self) -> String {
        let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push_str(&format!(r#"<hello xmlns="{NETCONF_NS}"><capabilities>"#));
        for cap in &self.capabilities {
            xml.push_str("<capability>");
            xml.push_str(&escape(cap.as_str()));
            xml.push_str("</capability>");
        }
        xml.push_str("</capabilities>");
        if let Some(id) = self.session_id {
            xml.push_str(&format!("<session-id>{id}</session-id>"));
        }
        xml.push_str("</hello>");
        xml
    }

    /// Parse a hello. Any structural problem is a [`NetconfError::Negotiation`].
    pub fn from_xml(xml: &str) -> Result<Self> {
        if !HELLO_RE.is_match(xml) {
            return Err(NetconfError::Negotiation(
                "first message is not a <hello>".to_string(),
            ));
        }

        let capabilities: Capabilities = CAPABILITY_RE
            .captures_iter(xml)
            .map(|c| unescape(&c[1]))
            .collect();
        if capabilities.is_empty() {
            return Err(NetconfError::Negotiation(
                "hello carries no capabilities".to_string(),
            ));
        }

        let session_id = match SESSION_ID_RE.captures(xml) {
            Some(c) => match c[1].parse::<u32>() {
                Ok(id) if id > 0 => Some(id),
                _ => {
                    return Err(NetconfError::Negotiation(format!(
                        "invalid session-id {:?}",
                        &c[1]
                    )))
                },
            },
            None => None,
        };

        Ok(Self {
            capabilities,
            session_id,
        })
    }
}

/// An RPC received by a server session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rpc {
    /// Id to echo in the reply
    pub message_id: String,
    /// Complete `<rpc>` document
    pub xml: String,
}

impl Rpc {
    /// Whether this RPC is `<close-session/>`.
    pub fn is_close_session(&self) -> bool {
        CLOSE_SESSION_RE.is_match(&self.xml)
    }
}

/// An `<rpc-reply>` received by a client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcReply {
    /// Id of the RPC this reply answers
    pub message_id: MessageId,
    /// Complete `<rpc-reply>` document
    pub xml: String,
}

/// Wrap `body` in an `<rpc>` element tagged with `id`.
pub fn rpc_envelope(id: MessageId, body: &str) -> String {
    format!(r#"<rpc message-id="{id}" xmlns="{NETCONF_NS}">{body}</rpc>"#)
}

/// Wrap `body` in an `<rpc-reply>` element echoing `message_id`.
pub fn reply_envelope(message_id: &str, body: &str) -> String {
    format!(
        r#"<rpc-reply message-id="{}" xmlns="{NETCONF_NS}">{body}</rpc-reply>"#,
        escape(message_id)
    )
}

/// Body of a `<close-session/>` RPC.
pub const CLOSE_SESSION: &str = "<close-session/>";

/// Body of a positive reply.
pub const OK: &str = "<ok/>";

/// Parse an inbound `<rpc>` and extract its message id.
pub fn parse_rpc(xml: &str) -> Result<Rpc> {
    let captures = RPC_RE
        .captures(xml)
        .ok_or_else(|| NetconfError::Protocol("message is not an <rpc> with a message-id".to_string()))?;
    Ok(Rpc {
        message_id: unescape(&captures[1]),
        xml: xml.to_string(),
    })
}

/// Parse an inbound `<rpc-reply>` and extract its numeric message id.
pub fn parse_reply(xml: &str) -> Result<RpcReply> {
    let captures = REPLY_RE.captures(xml).ok_or_else(|| {
        NetconfError::Protocol("message is not an <rpc-reply> with a message-id".to_string())
    })?;
    let message_id = captures[1]
        .trim()
        .parse::<u64>()
        .map(MessageId)
        .map_err(|_| NetconfError::Protocol(format!("reply message-id {:?} is not numeric", &captures[1])))?;
    Ok(RpcReply {
        message_id,
        xml: xml.to_string(),
    })
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
