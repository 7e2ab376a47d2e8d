//! "Who am I?" extended operation (RFC 4532)
//!
//! The request carries no value. The response value is the authorization
//! identity of the bound principal in the RFC 4513 `authzId` form:
//! `dn:<distinguished name>`, `u:<userid>`, or empty for anonymous.

use ldap3::exop::Exop;
use serde::Serialize;
use tracing::error;

pub const WHOAMI_OID: &str = "1.3.6.1.4.1.4203.1.11.3";

const DN_PREFIX: &str = "dn:";
const USERNAME_PREFIX: &str = "u:";

#[derive(Debug, Clone, Copy, Default)]
pub struct WhoAmIRequest;

impl WhoAmIRequest {
    pub fn oid(&self) -> &'static str {
        WHOAMI_OID
    }
}

impl From<WhoAmIRequest> for Exop {
    fn from(_: WhoAmIRequest) -> Exop {
        Exop {
            name: Some(WHOAMI_OID.to_string()),
            val: None,
        }
    }
}

/// Kind of identity carried by an `authzId`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthzIdType {
    Unknown,
    Dn,
    Username,
}

impl std::fmt::Display for AuthzIdType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthzIdType::Unknown => write!(f, "unknown"),
            AuthzIdType::Dn => write!(f, "dn"),
            AuthzIdType::Username => write!(f, "username"),
        }
    }
}

/// Decoded WhoAmI response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoAmIResult {
    response_id: Option<String>,
    authz_id: Option<String>,
    kind: AuthzIdType,
    dn: Option<String>,
    userid: Option<String>,
}

impl WhoAmIResult {
    /// Decode a response value. Never fails: a value that is not UTF-8 yields
    /// an `Unknown` result with no authzId.
    pub fn decode(response_id: Option<String>, value: &[u8]) -> Self {
        let authz_id = match std::str::from_utf8(value) {
            Ok(text) => text.to_string(),
            Err(e) => {
                error!("WhoAmI response is not valid UTF-8: {}", e);
                return Self {
                    response_id,
                    authz_id: None,
                    kind: AuthzIdType::Unknown,
                    dn: None,
                    userid: None,
                };
            }
        };

        let (kind, dn, userid) = if let Some(dn) = authz_id.strip_prefix(DN_PREFIX) {
            (AuthzIdType::Dn, Some(dn.to_string()), None)
        } else if let Some(userid) = authz_id.strip_prefix(USERNAME_PREFIX) {
            (AuthzIdType::Username, None, Some(userid.to_string()))
        } else {
            (AuthzIdType::Unknown, None, None)
        };

        Self {
            response_id,
            authz_id: Some(authz_id),
            kind,
            dn,
            userid,
        }
    }

    /// Decode from a generic extended response; an absent value is the
    /// anonymous (empty) identity.
    pub fn from_exop(exop: Exop) -> Self {
        Self::decode(exop.name, exop.val.as_deref().unwrap_or_default())
    }

    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    pub fn authz_id(&self) -> Option<&str> {
        self.authz_id.as_deref()
    }

    pub fn kind(&self) -> AuthzIdType {
        self.kind
    }

    pub fn dn(&self) -> Option<&str> {
        self.dn.as_deref()
    }

    pub fn userid(&self) -> Option<&str> {
        self.userid.as_deref()
    }
}
