//! Directory error types

use ldap3::SearchEntry;
use std::time::Duration;
use thiserror::Error;

/// Failures of a single directory operation
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Connection closed by the server")]
    Closed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Operation failed with result code {code}: {message}")]
    Operation { code: u32, message: String },

    #[error("Invalid search filter: {0}")]
    Filter(String),

    #[error("Invalid server URI: {0}")]
    Uri(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("SASL error: {0}")]
    Sasl(String),
}

/// A search that failed, with whatever entries arrived before the failure
#[derive(Error, Debug)]
#[error("{source}")]
pub struct SearchError {
    #[source]
    pub source: DirectoryError,
    pub partial: Vec<SearchEntry>,
}

impl From<DirectoryError> for SearchError {
    fn from(source: DirectoryError) -> Self {
        Self {
            source,
            partial: Vec::new(),
        }
    }
}

/// Failures of the connect-and-bind step
#[derive(Error, Debug)]
pub enum BindError {
    /// The server refused the principal, credential or mechanism
    #[error("{0}")]
    Rejected(String),

    /// Nothing in the configured mechanism list is implemented here
    #[error("No supported SASL mechanism among: {0}")]
    UnsupportedMechanism(String),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl From<BindError> for ldap_sasl_core::Error {
    fn from(err: BindError) -> Self {
        match err {
            BindError::Rejected(msg) => ldap_sasl_core::Error::BadCredentials(msg),
            other => ldap_sasl_core::Error::Service(other.to_string()),
        }
    }
}
