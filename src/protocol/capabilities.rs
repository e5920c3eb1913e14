//! Capability sets for the NETCONF hello exchange.
//!
//! A capability is a URI, optionally followed by `?key=value&...` parameters.
//! Each peer advertises its set in its hello; the session's effective feature
//! set is computed by [`merge_intersection`].

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{BASE_PREFIX, CAP_NOTIFICATION};
use crate::error::{NetconfError, Result};

/// NETCONF base protocol version.
///
/// Versions are totally ordered; negotiation picks the highest one both
/// peers advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BaseVersion {
    /// `urn:ietf:params:netconf:base:1.0` (end-of-message framing)
    #[serde(rename = "1.0")]
    V1_0,
    /// `urn:ietf:params:netconf:base:1.1` (chunked framing)
    #[serde(rename = "1.1")]
    V1_1,
}

impl BaseVersion {
    /// All known versions, lowest first.
    pub const ALL: [BaseVersion; 2] = [BaseVersion::V1_0, BaseVersion::V1_1];

    /// Capability URI announcing this version.
    pub fn uri(self) -> &'static str {
        match self {
            BaseVersion::V1_0 => "urn:ietf:params:netconf:base:1.0",
            BaseVersion::V1_1 => "urn:ietf:params:netconf:base:1.1",
        }
    }

    /// Parse a base capability URI. Parameters after `?` are ignored.
    pub fn from_uri(uri: &str) -> Option<Self> {
        let uri = uri.split('?').next().unwrap_or(uri);
        match uri.strip_prefix(BASE_PREFIX)? {
            "1.0" => Some(BaseVersion::V1_0),
            "1.1" => Some(BaseVersion::V1_1),
            _ => None,
        }
    }
}

impl fmt::Display for BaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseVersion::V1_0 => write!(f, "1.0"),
            BaseVersion::V1_1 => write!(f, "1.1"),
        }
    }
}

/// A single capability: URI plus optional parameter string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Capability {
    full: String,
    query_at: Option<usize>,
}

impl Capability {
    /// Parse `uri[?params]`. Surrounding whitespace is trimmed.
    pub fn parse(text: &str) -> Self {
        let full = text.trim().to_string();
        let query_at = full.find('?');
        Self { full, query_at }
    }

    /// URI without parameters.
    pub fn uri(&self) -> &str {
        match self.query_at {
            Some(at) => &self.full[..at],
            None => &self.full,
        }
    }

    /// Parameter string after `?`, if any.
    pub fn params(&self) -> Option<&str> {
        self.query_at.map(|at| &self.full[at + 1..])
    }

    /// Full capability string as advertised.
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// Base version announced by this capability, if it is a base capability.
    pub fn base_version(&self) -> Option<BaseVersion> {
        BaseVersion::from_uri(self.uri())
    }

    fn matches(&self, query: &str) -> bool {
        if query.contains('?') {
            self.full == query
        } else if query.ends_with(':') {
            self.uri().starts_with(query)
        } else {
            self.uri() == query
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl From<&str> for Capability {
    fn from(text: &str) -> Self {
        Capability::parse(text)
    }
}

/// Ordered set of capabilities, unique by URI.
///
/// Iteration follows insertion order. [`Capabilities::iter`] borrows the set,
/// so it cannot be mutated while an iterator is alive; take
/// [`Capabilities::to_vec`] for an owned snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    entries: Vec<Capability>,
}

impl Capabilities {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard set supported by this implementation.
    pub fn default_set() -> Self {
        let mut caps = Self::new();
        for uri in DEFAULT_CAPABILITIES {
            caps.add(*uri);
        }
        caps
    }

    /// Add a capability (`uri[?params]`).
    ///
    /// Returns `false` and leaves the set unchanged if the URI is already
    /// present, whatever its parameters.
    pub fn add(&mut self, capability: impl Into<Capability>) -> bool {
        let capability = capability.into();
        if capability.full.is_empty() || self.position(capability.uri()).is_some() {
            return false;
        }
        self.entries.push(capability);
        true
    }

    /// Builder form of [`Capabilities::add`].
    pub fn with(mut self, capability: impl Into<Capability>) -> Self {
        self.add(capability);
        self
    }

    /// Remove a capability by URI. Returns whether it was present.
    pub fn remove(&mut self, uri: &str) -> bool {
        let uri = uri.split('?').next().unwrap_or(uri);
        match self.position(uri) {
            Some(at) => {
                self.entries.remove(at);
                true
            },
            None => false,
        }
    }

    /// Membership test.
    ///
    /// A query ending in `:` is a version prefix (`urn:ietf:params:netconf:base:`
    /// matches any base version). A query with `?params` must match the full
    /// capability string. Anything else is compared against the URI alone.
    pub fn contains(&self, query: &str) -> bool {
        self.get(query).is_some()
    }

    /// First capability matching `query` (see [`Capabilities::contains`]).
    pub fn get(&self, query: &str) -> Option<&Capability> {
        self.entries.iter().find(|c| c.matches(query))
    }

    /// Iterate capabilities in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Capability> {
        self.entries.iter()
    }

    /// Owned snapshot of the capability strings.
    pub fn to_vec(&self) -> Vec<String> {
        self.entries.iter().map(|c| c.full.clone()).collect()
    }

    /// Number of distinct URIs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Base versions advertised in this set, lowest first.
    pub fn base_versions(&self) -> Vec<BaseVersion> {
        let mut versions: Vec<BaseVersion> =
            self.entries.iter().filter_map(Capability::base_version).collect();
        versions.sort();
        versions.dedup();
        versions
    }

    /// Highest advertised base version.
    pub fn highest_base_version(&self) -> Option<BaseVersion> {
        self.base_versions().last().copied()
    }

    /// Whether the `:notification` capability is advertised.
    pub fn supports_notifications(&self) -> bool {
        self.contains(CAP_NOTIFICATION)
    }

    /// Negotiate with a peer's set; `self` is the local side.
    pub fn negotiate(&self, remote: &Capabilities) -> Result<NegotiatedCaps> {
        merge_intersection(self, remote)
    }

    fn position(&self, uri: &str) -> Option<usize> {
        self.entries.iter().position(|c| c.uri() == uri)
    }
}

impl<'a> IntoIterator for &'a Capabilities {
    type Item = &'a Capability;
    type IntoIter = std::slice::Iter<'a, Capability>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<S: AsRef<str>> FromIterator<S> for Capabilities {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut caps = Capabilities::new();
        for item in iter {
            caps.add(item.as_ref());
        }
        caps
    }
}

/// Result of capability negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedCaps {
    /// Highest base version both peers support
    pub version: BaseVersion,
    /// Effective capability set of the session
    pub capabilities: Capabilities,
    /// Peer advertised `:notification`
    pub notification_allowed: bool,
}

/// Compute a session's effective capability set.
///
/// The result holds the highest base version common to both sets, followed by
/// every non-base capability of `remote` that `local` also supports, in
/// remote order and with the remote's parameters. Fails with
/// [`NetconfError::Negotiation`] when no base version is shared.
pub fn merge_intersection(local: &Capabilities, remote: &Capabilities) -> Result<NegotiatedCaps> {
    let local_versions = local.base_versions();
    let version = remote
        .base_versions()
        .into_iter()
        .filter(|v| local_versions.contains(v))
        .max()
        .ok_or_else(|| {
            NetconfError::Negotiation(format!(
                "no common base version (local {:?}, remote {:?})",
                local_versions,
                remote.base_versions()
            ))
        })?;

    let mut capabilities = Capabilities::new();
    capabilities.add(version.uri());
    for cap in remote.iter().filter(|c| c.base_version().is_none()) {
        if local.contains(cap.uri()) {
            capabilities.add(cap.clone());
        }
    }

    Ok(NegotiatedCaps {
        version,
        capabilities,
        notification_allowed: remote.supports_notifications(),
    })
}

const DEFAULT_CAPABILITIES: &[&str] = &[
    "urn:ietf:params:netconf:base:1.0",
    "urn:ietf:params:netconf:base:1.1",
    "urn:ietf:params:netconf:capability:writable-running:1.0",
    "urn:ietf:params:netconf:capability:candidate:1.0",
    "urn:ietf:params:netconf:capability:startup:1.0",
    "urn:ietf:params:netconf:capability:rollback-on-error:1.0",
    "urn:ietf:params:netconf:capability:validate:1.1",
    "urn:ietf:params:netconf:capability:url:1.0?scheme=scp,file",
    "urn:ietf:params:netconf:capability:notification:1.0",
    "urn:ietf:params:netconf:capability:interleave:1.0",
    "urn:ietf:params:netconf:capability:with-defaults:1.0?basic-mode=explicit&also-supported=report-all,trim",
    "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring?module=ietf-netconf-monitoring&revision=2010-10-04",
];

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NOTIF: &str = "urn:ietf:params:netconf:capability:notification:1.0";
    const CANDIDATE: &str = "urn:ietf:params:netconf:capability:candidate:1.0";

    #[test]
    fn test_default_set_has_both_base_versions() {
        let caps = Capabilities::default_set();
        assert_eq!(caps.base_versions(), vec![BaseVersion::V1_0, BaseVersion::V1_1]);
        assert!(caps.supports_notifications());
        assert_eq!(caps, Capabilities::default_set());
    }

    #[test]
    fn test_add_duplicate_is_noop() {
        let mut caps = Capabilities::new();
        assert!(caps.add("urn:ietf:params:netconf:capability:url:1.0?scheme=file"));
        assert!(!caps.add("urn:ietf:params:netconf:capability:url:1.0?scheme=scp"));
        assert_eq!(caps.len(), 1);
        assert_eq!(
            caps.get("urn:ietf:params:netconf:capability:url:1.0").unwrap().params(),
            Some("scheme=file")
        );
    }

    #[test]
    fn test_contains_prefix_and_params() {
        let caps = Capabilities::new()
            .with(BaseVersion::V1_1.uri())
            .with("urn:ietf:params:netconf:capability:url:1.0?scheme=file");

        assert!(caps.contains(BASE_PREFIX));
        assert!(caps.contains("urn:ietf:params:netconf:base:1.1"));
        assert!(!caps.contains("urn:ietf:params:netconf:base:1.0"));
        assert!(caps.contains("urn:ietf:params:netconf:capability:url:1.0"));
        assert!(caps.contains("urn:ietf:params:netconf:capability:url:1.0?scheme=file"));
        assert!(!caps.contains("urn:ietf:params:netconf:capability:url:1.0?scheme=scp"));
        // Not a prefix query: no partial match.
        assert!(!caps.contains("urn:ietf:params:netconf:capability:url"));
    }

    #[test]
    fn test_remove_ignores_params() {
        let mut caps: Capabilities =
            ["urn:ietf:params:netconf:capability:url:1.0?scheme=file"].into_iter().collect();
        assert!(caps.remove("urn:ietf:params:netconf:capability:url:1.0?scheme=other"));
        assert!(!caps.remove("urn:ietf:params:netconf:capability:url:1.0"));
        assert!(caps.is_empty());
    }

    #[test]
    fn test_iteration_is_restartable() {
        let caps = Capabilities::new().with(BaseVersion::V1_0.uri()).with(NOTIF);
        let first: Vec<&str> = caps.iter().map(Capability::as_str).collect();
        let second: Vec<&str> = (&caps).into_iter().map(Capability::as_str).collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![BaseVersion::V1_0.uri(), NOTIF]);
    }

    #[test]
    fn test_base_version_from_uri() {
        assert_eq!(
            BaseVersion::from_uri("urn:ietf:params:netconf:base:1.1"),
            Some(BaseVersion::V1_1)
        );
        assert_eq!(BaseVersion::from_uri("urn:ietf:params:netconf:base:2.0"), None);
        assert_eq!(BaseVersion::from_uri(NOTIF), None);
        assert!(BaseVersion::V1_0 < BaseVersion::V1_1);
    }

    #[test]
    fn test_negotiate_picks_highest_common_version() {
        let client = Capabilities::new()
            .with(BaseVersion::V1_0.uri())
            .with(BaseVersion::V1_1.uri());
        let server = Capabilities::new().with(BaseVersion::V1_0.uri());

        let negotiated = client.negotiate(&server).unwrap();
        assert_eq!(negotiated.version, BaseVersion::V1_0);
        assert_eq!(negotiated.capabilities.to_vec(), vec![BaseVersion::V1_0.uri()]);
    }

    #[test]
    fn test_negotiate_optional_caps_need_both_sides() {
        let client = Capabilities::new().with(BaseVersion::V1_0.uri()).with(CANDIDATE);
        let server = Capabilities::new()
            .with(BaseVersion::V1_0.uri())
            .with(NOTIF)
            .with(CANDIDATE);

        let negotiated = client.negotiate(&server).unwrap();
        assert!(negotiated.capabilities.contains(CANDIDATE));
        assert!(!negotiated.capabilities.contains(NOTIF));
        assert!(negotiated.notification_allowed);
    }

    #[test]
    fn test_negotiate_keeps_remote_params() {
        let local = Capabilities::new()
            .with(BaseVersion::V1_1.uri())
            .with("urn:ietf:params:netconf:capability:url:1.0?scheme=file");
        let remote = Capabilities::new()
            .with(BaseVersion::V1_1.uri())
            .with("urn:ietf:params:netconf:capability:url:1.0?scheme=scp");

        let negotiated = merge_intersection(&local, &remote).unwrap();
        let url = negotiated
            .capabilities
            .get("urn:ietf:params:netconf:capability:url:1.0")
            .unwrap();
        assert_eq!(url.params(), Some("scheme=scp"));
    }

    #[test]
    fn test_no_common_base_version() {
        let client = Capabilities::new().with(BaseVersion::V1_0.uri());
        let server = Capabilities::new().with(BaseVersion::V1_1.uri()).with(NOTIF);

        let err = client.negotiate(&server).unwrap_err();
        assert!(matches!(err, NetconfError::Negotiation(_)));
    }

    fn uri_strategy() -> impl Strategy<Value = String> {
        "[a-z]{1,6}".prop_map(|name| format!("urn:example:{name}:1.0"))
    }

    proptest! {
        #[test]
        fn prop_add_then_contains_then_remove(uri in uri_strategy()) {
            let mut caps = Capabilities::default_set();
            prop_assume!(!caps.contains(&uri));
            prop_assert!(caps.add(uri.as_str()));
            prop_assert!(caps.contains(&uri));
            prop_assert!(caps.remove(&uri));
            prop_assert!(!caps.contains(&uri));
        }

        #[test]
        fn prop_len_counts_distinct(
            added in proptest::collection::vec(uri_strategy(), 0..20),
            removed in proptest::collection::vec(uri_strategy(), 0..10),
        ) {
            let mut caps = Capabilities::new();
            for uri in &added {
                caps.add(uri.as_str());
            }
            for uri in &removed {
                caps.remove(uri);
            }
            let mut expected: Vec<&String> =
                added.iter().filter(|u| !removed.contains(*u)).collect();
            expected.sort();
            expected.dedup();
            prop_assert_eq!(caps.len(), expected.len());
        }

        #[test]
        fn prop_merge_is_base_plus_supported_remote(
            local_opt in proptest::collection::vec(uri_strategy(), 0..8),
            remote_opt in proptest::collection::vec(uri_strategy(), 0..8),
            local_11 in any::<bool>(),
            remote_11 in any::<bool>(),
        ) {
            let mut local = Capabilities::new().with(BaseVersion::V1_0.uri());
            if local_11 {
                local.add(BaseVersion::V1_1.uri());
            }
            let mut remote = Capabilities::new().with(BaseVersion::V1_0.uri());
            if remote_11 {
                remote.add(BaseVersion::V1_1.uri());
            }
            for uri in &local_opt {
                local.add(uri.as_str());
            }
            for uri in &remote_opt {
                remote.add(uri.as_str());
            }

            let negotiated = merge_intersection(&local, &remote).unwrap();
            let expected_version =
                if local_11 && remote_11 { BaseVersion::V1_1 } else { BaseVersion::V1_0 };
            prop_assert_eq!(negotiated.version, expected_version);
            prop_assert_eq!(negotiated.capabilities.base_versions(), vec![expected_version]);

            for cap in negotiated.capabilities.iter().filter(|c| c.base_version().is_none()) {
                prop_assert!(remote.contains(cap.uri()));
                prop_assert!(local.contains(cap.uri()));
            }
            for cap in remote.iter().filter(|c| c.base_version().is_none()) {
                prop_assert_eq!(
                    negotiated.capabilities.contains(cap.uri()),
                    local.contains(cap.uri())
                );
            }
        }
    }
}
