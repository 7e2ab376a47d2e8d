//! User types

use serde::{Deserialize, Serialize};
use std::fmt;

/// A role or group name granted to an authenticated principal
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Authority(String);

impl Authority {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Build an authority from a directory group name, with an optional prefix.
    pub fn from_group(group_name: &str, prefix: Option<&str>) -> Self {
        match prefix {
            Some(prefix) => Self(format!("{}{}", prefix, group_name)),
            None => Self(group_name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Username and password presented for a bind
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The identity produced by a successful authentication or lookup.
///
/// The directory is the only source of account state, so the status flags
/// are always set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub username: String,

    /// Absent when DN resolution is disabled or failed
    pub dn: Option<String>,

    /// Group-derived authorities, as returned by the directory
    pub authorities: Vec<Authority>,

    pub enabled: bool,
    pub account_non_expired: bool,
    pub credentials_non_expired: bool,
    pub account_non_locked: bool,
}

impl AuthenticatedUser {
    pub fn new(username: impl Into<String>, dn: Option<String>, authorities: Vec<Authority>) -> Self {
        Self {
            username: username.into(),
            dn,
            authorities,
            enabled: true,
            account_non_expired: true,
            credentials_non_expired: true,
            account_non_locked: true,
        }
    }

    pub fn has_authority(&self, name: &str) -> bool {
        self.authorities.iter().any(|a| a.as_str() == name)
    }
}

/// Result of looking a user up without their password
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "user", rename_all = "snake_case")]
pub enum LookupOutcome {
    Found(AuthenticatedUser),
    NotFound,
}

impl LookupOutcome {
    pub fn user(&self) -> Option<&AuthenticatedUser> {
        match self {
            LookupOutcome::Found(user) => Some(user),
            LookupOutcome::NotFound => None,
        }
    }
}
