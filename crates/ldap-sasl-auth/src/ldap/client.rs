//! LDAP SASL authenticator
//!
//! Binds to the directory as the user with a negotiated SASL mechanism, then
//! resolves the user's DN and group authorities on the bound session.

use super::connection::LdapConnector;
use super::dn::{user_dn_resolver, UserDnResolver};
use super::group::{group_resolver, GroupResolver};
use super::sasl::supported_subset;
use super::session::{BindRequest, DirectoryConnector, DirectorySession};
use crate::error::BindError;
use ldap_sasl_core::validate::valid_ldap_uris;
use ldap_sasl_core::{
    AuthenticatedUser, Credentials, Error, LookupOutcome, RealmConfig, Result,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Authenticates users against an LDAP directory
pub struct LdapSaslAuthenticator {
    config: RealmConfig,
    connector: Arc<dyn DirectoryConnector>,
    user_dn_resolver: Arc<dyn UserDnResolver>,
    group_resolver: Arc<dyn GroupResolver>,
}

impl LdapSaslAuthenticator {
    /// Create an authenticator that talks to the configured servers
    pub fn new(config: RealmConfig) -> Result<Self> {
        let connector = LdapConnector::new(&config.tls)
            .map_err(|e| Error::Configuration(e.to_string()))?;
        Ok(Self::with_connector(config, Arc::new(connector)))
    }

    /// Create an authenticator over any directory connector
    pub fn with_connector(config: RealmConfig, connector: Arc<dyn DirectoryConnector>) -> Self {
        let user_dn_resolver = user_dn_resolver(config.user_dn_resolver.as_ref());
        let group_resolver = group_resolver(config.group_resolver.as_ref());
        debug!(
            "Resolvers: user DN {:?}, groups {:?}",
            user_dn_resolver, group_resolver
        );

        Self {
            config,
            connector,
            user_dn_resolver,
            group_resolver,
        }
    }

    pub fn with_user_dn_resolver(mut self, resolver: Arc<dyn UserDnResolver>) -> Self {
        self.user_dn_resolver = resolver;
        self
    }

    pub fn with_group_resolver(mut self, resolver: Arc<dyn GroupResolver>) -> Self {
        self.group_resolver = resolver;
        self
    }

    pub fn config(&self) -> &RealmConfig {
        &self.config
    }

    /// Authenticate a user with username and password
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<AuthenticatedUser> {
        let request = self.bind_request(Credentials::new(username, password))?;

        debug!(
            "Authenticating {} against {} with [{}]",
            username,
            request.servers.join(" "),
            request.mechanisms.join(" ")
        );

        let mut session = self
            .connector
            .connect_and_bind(&request)
            .await
            .map_err(|e| {
                match &e {
                    BindError::Rejected(reason) => {
                        info!("Authentication of {} rejected: {}", username, reason)
                    }
                    other => warn!("Directory unavailable for {}: {}", username, other),
                }
                Error::from(e)
            })?;

        let dn = self
            .user_dn_resolver
            .resolve_dn(session.as_mut(), username)
            .await;
        let authorities = self
            .group_resolver
            .resolve_groups(session.as_mut(), dn.as_deref(), username)
            .await;
        session.close().await;

        info!(
            "Authenticated {} (dn: {:?}, {} authorities)",
            username,
            dn,
            authorities.len()
        );
        Ok(AuthenticatedUser::new(username, dn, authorities))
    }

    /// Look a user up with the service account, without their password
    pub async fn lookup(&self, username: &str) -> Result<LookupOutcome> {
        let service = self.config.service_account.clone().ok_or_else(|| {
            Error::Configuration("No service account is configured for lookups".into())
        })?;
        let request = self.bind_request(service)?;

        let mut session = self
            .connector
            .connect_and_bind(&request)
            .await
            .map_err(|e| match e {
                // The user's credentials are not involved here
                BindError::Rejected(reason) => {
                    Error::Service(format!("Service account bind rejected: {}", reason))
                }
                other => Error::from(other),
            })?;

        let outcome = self.lookup_on(session.as_mut(), username).await;
        session.close().await;
        Ok(outcome)
    }

    async fn lookup_on(&self, session: &mut dyn DirectorySession, username: &str) -> LookupOutcome {
        if self.user_dn_resolver.identifies_bound_principal() {
            warn!(
                "{:?} can only identify the bound principal; cannot look up {}",
                self.user_dn_resolver, username
            );
            return LookupOutcome::NotFound;
        }

        let dn = match self.user_dn_resolver.resolve_dn(session, username).await {
            Some(dn) => dn,
            None => {
                debug!("User {} not found", username);
                return LookupOutcome::NotFound;
            }
        };

        let authorities = self
            .group_resolver
            .resolve_groups(session, Some(&dn), username)
            .await;
        LookupOutcome::Found(AuthenticatedUser::new(username, Some(dn), authorities))
    }

    /// Validate the configuration for one bind; fails before any I/O.
    fn bind_request(&self, credentials: Credentials) -> Result<BindRequest> {
        let servers = valid_ldap_uris(&self.config.servers);
        if servers.is_empty() {
            return Err(Error::Configuration(
                "No valid LDAP server URI is specified.".into(),
            ));
        }

        if self.config.mechanisms.is_empty() {
            return Err(Error::Configuration("No valid mechanism is specified.".into()));
        }

        let mechanisms = self.config.mechanisms.as_slice().to_vec();
        if supported_subset(&mechanisms).is_empty() {
            return Err(Error::Service(format!(
                "None of the configured SASL mechanisms is supported: {}",
                self.config.mechanisms.joined()
            )));
        }

        Ok(BindRequest {
            servers,
            mechanisms,
            credentials,
            connection_timeout: self.config.connection_timeout(),
            read_timeout: self.config.read_timeout(),
        })
    }
}
