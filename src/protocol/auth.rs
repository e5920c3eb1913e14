//! SSH user-authentication method negotiation (RFC 4252).
//!
//! The transport performs each individual attempt with its own credentials;
//! this module decides which methods to try and in what order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{NetconfError, Result};
use crate::transport::UserAuth;

/// SSH user-authentication method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    /// "publickey"
    #[serde(alias = "publickey")]
    PublicKey,
    /// "password"
    Password,
    /// "keyboard-interactive"
    #[serde(alias = "keyboard-interactive")]
    Interactive,
}

impl AuthMethod {
    /// Name on the SSH wire.
    pub fn name(self) -> &'static str {
        match self {
            AuthMethod::PublicKey => "publickey",
            AuthMethod::Password => "password",
            AuthMethod::Interactive => "keyboard-interactive",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AuthMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "publickey" | "public-key" | "pubkey" => Ok(Self::PublicKey),
            "password" => Ok(Self::Password),
            "keyboard-interactive" | "interactive" => Ok(Self::Interactive),
            _ => Err(format!("Unknown auth method: {}", s)),
        }
    }
}

/// Result of one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// User is authenticated
    Success,
    /// Attempt rejected (SSH_MSG_USERAUTH_FAILURE)
    Failure {
        /// Methods the server still accepts
        methods_can_continue: Vec<AuthMethod>,
        /// The attempt succeeded but more methods are required
        partial_success: bool,
    },
}

/// Per-method priorities; higher is tried first, negative disables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPreferences {
    priorities: [(AuthMethod, i16); 3],
}

impl Default for AuthPreferences {
    fn default() -> Self {
        Self {
            priorities: [
                (AuthMethod::Interactive, 3),
                (AuthMethod::Password, 2),
                (AuthMethod::PublicKey, 1),
            ],
        }
    }
}

impl AuthPreferences {
    /// Preferences trying exactly `order`, first entry first.
    pub fn from_order(order: &[AuthMethod]) -> Self {
        let mut prefs = Self::default();
        for entry in &mut prefs.priorities {
            entry.1 = -1;
        }
        let top = order.len() as i16;
        for (rank, method) in order.iter().enumerate() {
            let priority = top - rank as i16;
            if let Some(entry) = prefs.priorities.iter_mut().find(|(m, p)| m == method && *p < 0) {
                entry.1 = priority;
            }
        }
        prefs
    }

    /// Set a method's priority. A negative value disables it.
    pub fn set(&mut self, method: AuthMethod, priority: i16) {
        if let Some(entry) = self.priorities.iter_mut().find(|(m, _)| *m == method) {
            entry.1 = priority;
        }
    }

    /// Builder form of [`AuthPreferences::set`].
    pub fn with(mut self, method: AuthMethod, priority: i16) -> Self {
        self.set(method, priority);
        self
    }

    /// Priority of a method.
    pub fn priority(&self, method: AuthMethod) -> i16 {
        self.priorities
            .iter()
            .find(|(m, _)| *m == method)
            .map(|(_, p)| *p)
            .unwrap_or(-1)
    }

    /// Enabled methods, highest priority first.
    pub fn ordered(&self) -> Vec<AuthMethod> {
        let mut enabled: Vec<(AuthMethod, i16)> =
            self.priorities.iter().copied().filter(|(_, p)| *p >= 0).collect();
        // Stable sort keeps the default order between equal priorities.
        enabled.sort_by(|a, b| b.1.cmp(&a.1));
        enabled.into_iter().map(|(m, _)| m).collect()
    }
}

/// Drives method selection against a [`UserAuth`] transport.
#[derive(Debug, Clone, Default)]
pub struct AuthNegotiator {
    preferences: AuthPreferences,
}

impl AuthNegotiator {
    /// Create a negotiator for the given preferences.
    pub fn new(preferences: AuthPreferences) -> Self {
        Self { preferences }
    }

    /// Authenticate `user`. Returns the method that completed authentication.
    ///
    /// Methods are tried in preference order, skipping any the server does
    /// not currently allow. After a failure the server's "can continue" list
    /// replaces the allowed set.
    pub async fn authenticate<A>(&self, transport: &mut A, user: &str) -> Result<AuthMethod>
    where
        A: UserAuth + ?Sized,
    {
        let mut allowed = transport.auth_methods(user).await?;
        let mut tried = Vec::new();
        tracing::debug!(user, ?allowed, "SSH server auth methods");

        for method in self.preferences.ordered() {
            if !allowed.contains(&method) {
                tracing::debug!("Skipping {} (not offered by server)", method);
                continue;
            }

            tracing::debug!("Trying SSH auth method {} for {}", method, user);
            tried.push(method);
            match transport.authenticate(user, method).await? {
                AuthOutcome::Success => {
                    tracing::info!("Authenticated {} with {}", user, method);
                    return Ok(method);
                },
                AuthOutcome::Failure {
                    methods_can_continue,
                    partial_success,
                } => {
                    tracing::debug!(
                        "SSH auth method {} rejected (partial success: {})",
                        method,
                        partial_success
                    );
                    allowed = methods_can_continue;
                },
            }
        }

        let tried: Vec<&str> = tried.iter().map(|m| m.name()).collect();
        Err(NetconfError::Authentication(if tried.is_empty() {
            format!("no preferred method is offered for user {user}")
        } else {
            format!("all methods failed for user {user} (tried {})", tried.join(", "))
        }))
    }
}
