//! Error types for ldap-sasl

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Call-level failures of an authentication or lookup.
///
/// Only configuration problems and the connect/bind step produce these.
/// DN and group resolution never fail a call; they degrade to an absent DN
/// or an empty authority list instead.
#[derive(Error, Debug)]
pub enum Error {
    // Detected before any network I/O
    #[error("Configuration error: {0}")]
    Configuration(String),

    // The server rejected the principal, the credential or the mechanism
    #[error("Authentication failed: {0}")]
    BadCredentials(String),

    // Connectivity or protocol failure unrelated to the credentials
    #[error("Directory service error: {0}")]
    Service(String),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "ConfigurationError",
            Error::BadCredentials(_) => "BadCredentials",
            Error::Service(_) => "ServiceError",
        }
    }

    /// True for every failure that must not count against the user's credentials.
    pub fn is_service_error(&self) -> bool {
        !self.is_bad_credentials()
    }

    pub fn is_bad_credentials(&self) -> bool {
        matches!(self, Error::BadCredentials(_))
    }
}
