//! Directory session abstraction
//!
//! The resolvers only need search and extended operations on an already
//! bound connection; the authenticator only needs a way to produce one.
//! Both seams are traits so the wire client can be swapped for a fake.

use crate::error::{BindError, DirectoryError, SearchError};
use async_trait::async_trait;
use ldap3::exop::Exop;
use ldap3::{Scope, SearchEntry};
use ldap_sasl_core::Credentials;
use std::time::Duration;

/// An authenticated connection to one directory server
#[async_trait]
pub trait DirectorySession: Send {
    /// Run a search. `base` is relative to the naming context of the server URI.
    async fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<SearchEntry>, SearchError>;

    async fn extended(&mut self, exop: Exop) -> Result<Exop, DirectoryError>;

    /// Release the connection. Errors are logged, never returned.
    async fn close(&mut self);
}

/// Everything needed to open and bind a session
#[derive(Debug, Clone)]
pub struct BindRequest {
    /// Server URIs, tried in order
    pub servers: Vec<String>,
    pub mechanisms: Vec<String>,
    pub credentials: Credentials,
    pub connection_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
}

#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn connect_and_bind(
        &self,
        request: &BindRequest,
    ) -> Result<Box<dyn DirectorySession>, BindError>;
}
