//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`NETCONF_*`)
//!
//! ```toml
//! [session]
//! hello_timeout_secs = 30
//! idle_timeout_secs = 600   # 0 disables
//!
//! [ssh]
//! port = 830
//! user = "admin"
//! auth_order = ["publickey", "password"]
//!
//! [capabilities]
//! extra = ["urn:example:acme:1.0"]
//! disabled = ["urn:ietf:params:netconf:capability:startup:1.0"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NetconfError, Result};
use crate::protocol::{
    AuthMethod, AuthPreferences, Capabilities, SessionConfig, CLOSE_TIMEOUT_SECS,
    CONNECT_TIMEOUT_SECS, DEFAULT_MSGID_LIMIT, HELLO_TIMEOUT_SECS, NETCONF_PORT,
};

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Session time bounds
    #[serde(default)]
    pub session: SessionSection,

    /// SSH transport settings
    #[serde(default)]
    pub ssh: SshConfig,

    /// Adjustments to the advertised capability set
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            NetconfError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| NetconfError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Default file location (`<config dir>/netconf/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("netconf").join("config.toml"))
    }

    /// File at `path`, else the default file if present, else defaults;
    /// environment variables are applied on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `NETCONF_*` variables. Unparseable values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let secs = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        // Session settings
        if let Some(val) = secs("NETCONF_HELLO_TIMEOUT") {
            self.session.hello_timeout_secs = val;
        }
        if let Some(val) = secs("NETCONF_CLOSE_TIMEOUT") {
            self.session.close_timeout_secs = val;
        }
        if let Some(val) = secs("NETCONF_CONNECT_TIMEOUT") {
            self.session.connect_timeout_secs = val;
        }
        if let Some(val) = secs("NETCONF_IDLE_TIMEOUT") {
            self.session.idle_timeout_secs = val;
        }

        // SSH settings
        if let Some(port) = lookup("NETCONF_PORT").and_then(|v| v.trim().parse().ok()) {
            self.ssh.port = port;
        }
        if let Some(user) = lookup("NETCONF_USER").filter(|u| !u.is_empty()) {
            self.ssh.user = Some(user);
        }
        if let Some(order) = lookup("NETCONF_AUTH_ORDER") {
            let methods: Vec<AuthMethod> = order
                .split(',')
                .filter_map(|m| m.parse().ok())
                .collect();
            if !methods.is_empty() {
                self.ssh.auth_order = methods;
            }
        }
    }

    /// Reject settings no session could work with.
    pub fn validate(&self) -> Result<()> {
        if self.session.hello_timeout_secs == 0 {
            return Err(NetconfError::Config("hello_timeout_secs must be positive".to_string()));
        }
        if self.session.connect_timeout_secs == 0 {
            return Err(NetconfError::Config("connect_timeout_secs must be positive".to_string()));
        }
        if self.session.close_timeout_secs == 0 {
            return Err(NetconfError::Config("close_timeout_secs must be positive".to_string()));
        }
        if self.session.msgid_limit == 0 {
            return Err(NetconfError::Config("msgid_limit must be positive".to_string()));
        }
        if self.ssh.auth_order.is_empty() {
            return Err(NetconfError::Config("auth_order must name at least one method".to_string()));
        }
        Ok(())
    }

    /// Session bounds as used by `Client` and `Server`.
    pub fn session_config(&self) -> SessionConfig {
        let s = &self.session;
        SessionConfig {
            hello_timeout: Duration::from_secs(s.hello_timeout_secs),
            close_timeout: Duration::from_secs(s.close_timeout_secs),
            connect_timeout: Duration::from_secs(s.connect_timeout_secs),
            idle_timeout: (s.idle_timeout_secs > 0).then(|| Duration::from_secs(s.idle_timeout_secs)),
            msgid_limit: s.msgid_limit,
        }
    }

    /// Auth preferences following `ssh.auth_order`.
    pub fn auth_preferences(&self) -> AuthPreferences {
        AuthPreferences::from_order(&self.ssh.auth_order)
    }

    /// Default capability set with `extra` added and `disabled` removed.
    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::default_set();
        for uri in &self.capabilities.extra {
            caps.add(uri.as_str());
        }
        for uri in &self.capabilities.disabled {
            caps.remove(uri);
        }
        caps
    }
}

/// Session time bounds, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Bound on receiving the peer's hello
    pub hello_timeout_secs: u64,

    /// Bound on the close-session exchange
    pub close_timeout_secs: u64,

    /// Bound on connect plus authentication
    pub connect_timeout_secs: u64,

    /// Inactivity bound for working sessions (0 = disabled)
    pub idle_timeout_secs: u64,

    /// Message-id wrap bound
    pub msgid_limit: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            hello_timeout_secs: HELLO_TIMEOUT_SECS,
            close_timeout_secs: CLOSE_TIMEOUT_SECS,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: 0,
            msgid_limit: DEFAULT_MSGID_LIMIT,
        }
    }
}

/// SSH transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Server port
    pub port: u16,

    /// Default user name
    pub user: Option<String>,

    /// Auth methods to try, most preferred first
    pub auth_order: Vec<AuthMethod>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            port: NETCONF_PORT,
            user: None,
            auth_order: AuthPreferences::default().ordered(),
        }
    }
}

/// Capability set adjustments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitiesConfig {
    /// URIs advertised in addition to the default set
    pub extra: Vec<String>,

    /// URIs removed from the default set
    pub disabled: Vec<String>,
}
