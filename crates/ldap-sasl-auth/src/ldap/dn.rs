//! User DN resolution
//!
//! After a successful bind the authenticator asks a [`UserDnResolver`] for
//! the distinguished name of the user. Resolution is best effort: every
//! failure is logged and reported as an absent DN, never as an error.

use super::session::DirectorySession;
use super::whoami::{AuthzIdType, WhoAmIRequest, WhoAmIResult};
use async_trait::async_trait;
use ldap3::Scope;
use ldap_sasl_core::UserDnResolverConfig;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
pub trait UserDnResolver: Send + Sync + fmt::Debug {
    async fn resolve_dn(
        &self,
        session: &mut dyn DirectorySession,
        username: &str,
    ) -> Option<String>;

    /// True when the resolver reports the identity of the bound principal
    /// rather than looking `username` up.
    fn identifies_bound_principal(&self) -> bool {
        false
    }
}

/// Build the resolver for a configuration section; absent means no resolution.
pub fn user_dn_resolver(config: Option<&UserDnResolverConfig>) -> Arc<dyn UserDnResolver> {
    match config {
        None | Some(UserDnResolverConfig::None) => Arc::new(NoUserDnResolver),
        Some(UserDnResolverConfig::Whoami) => Arc::new(WhoAmIUserDnResolver),
        Some(UserDnResolverConfig::Search {
            search_base,
            search_query_template,
        }) => Arc::new(SearchUserDnResolver::new(
            search_base.clone(),
            search_query_template.clone(),
        )),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoUserDnResolver;

#[async_trait]
impl UserDnResolver for NoUserDnResolver {
    async fn resolve_dn(&self, _session: &mut dyn DirectorySession, _username: &str) -> Option<String> {
        None
    }
}

/// Asks the server who the session is bound as (RFC 4532).
#[derive(Debug, Clone, Copy, Default)]
pub struct WhoAmIUserDnResolver;

#[async_trait]
impl UserDnResolver for WhoAmIUserDnResolver {
    async fn resolve_dn(&self, session: &mut dyn DirectorySession, username: &str) -> Option<String> {
        let response = match session.extended(WhoAmIRequest.into()).await {
            Ok(response) => response,
            Err(e) => {
                warn!("WhoAmI request for {} failed: {}", username, e);
                return None;
            }
        };

        let result = WhoAmIResult::from_exop(response);
        match result.kind() {
            AuthzIdType::Dn => {
                debug!("WhoAmI resolved {} to {:?}", username, result.dn());
                result.dn().map(str::to_string)
            }
            kind => {
                warn!(
                    "WhoAmI returned a {} authzId for {} ({:?}), expected a DN",
                    kind,
                    username,
                    result.authz_id()
                );
                None
            }
        }
    }

    fn identifies_bound_principal(&self) -> bool {
        true
    }
}

/// Subtree search with a filter built from a template.
#[derive(Debug, Clone)]
pub struct SearchUserDnResolver {
    search_base: String,
    query_template: String,
}

const USERNAME_PLACEHOLDERS: [&str; 2] = ["{username}", "{0}"];

impl SearchUserDnResolver {
    pub fn new(search_base: impl Into<String>, query_template: impl Into<String>) -> Self {
        Self {
            search_base: search_base.into(),
            query_template: query_template.into(),
        }
    }

    /// Substitute the escaped username into the template.
    ///
    /// The template is scanned once, so placeholder text inside the username
    /// is never expanded again.
    pub fn filter_for(&self, username: &str) -> String {
        let escaped = ldap3::ldap_escape(username);
        let mut filter = String::with_capacity(self.query_template.len() + escaped.len());
        let mut rest = self.query_template.as_str();
        while let Some(start) = rest.find('{') {
            filter.push_str(&rest[..start]);
            let tail = &rest[start..];
            match USERNAME_PLACEHOLDERS.iter().find(|p| tail.starts_with(*p)) {
                Some(placeholder) => {
                    filter.push_str(&escaped);
                    rest = &tail[placeholder.len()..];
                }
                None => {
                    filter.push('{');
                    rest = &tail[1..];
                }
            }
        }
        filter.push_str(rest);
        filter
    }
}

#[async_trait]
impl UserDnResolver for SearchUserDnResolver {
    async fn resolve_dn(&self, session: &mut dyn DirectorySession, username: &str) -> Option<String> {
        if self.query_template.trim().is_empty() {
            debug!("User search query is not configured, DN left unresolved");
            return None;
        }

        let filter = self.filter_for(username);
        debug!("Searching user DN under '{}' with filter {}", self.search_base, filter);

        // "1.1": no attributes, only the DN is wanted
        let entries = match session
            .search(&self.search_base, Scope::Subtree, &filter, &["1.1"])
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!("User DN search for {} failed: {}", username, e);
                return None;
            }
        };

        match entries.len() {
            0 => {
                warn!("No entry found for user {} (filter {})", username, filter);
                None
            }
            1 => entries.into_iter().next().map(|entry| entry.dn),
            n => {
                warn!(
                    "User search for {} is ambiguous: {} entries match {}",
                    username, n, filter
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::fake::{entry, FakeSession, SearchScript};

    const TEMPLATE: &str = "(uid={username})";

    #[tokio::test]
    async fn test_noop_returns_none() {
        let mut session = FakeSession::new();
        assert_eq!(NoUserDnResolver.resolve_dn(&mut session, "alice").await, None);
        assert_eq!(session.search_count(), 0);
    }

    #[tokio::test]
    async fn test_whoami_dn() {
        let mut session = FakeSession::new().with_whoami(b"dn:uid=alice,ou=People,dc=example,dc=com");
        let dn = WhoAmIUserDnResolver.resolve_dn(&mut session, "alice").await;
        assert_eq!(dn.as_deref(), Some("uid=alice,ou=People,dc=example,dc=com"));
        assert_eq!(
            session.log.lock().unwrap().extended,
            vec!["1.3.6.1.4.1.4203.1.11.3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_whoami_non_dn_is_none() {
        let mut session = FakeSession::new().with_whoami(b"u:alice");
        assert_eq!(WhoAmIUserDnResolver.resolve_dn(&mut session, "alice").await, None);

        let mut session = FakeSession::new().with_whoami(&[0xff, 0xfe]);
        assert_eq!(WhoAmIUserDnResolver.resolve_dn(&mut session, "alice").await, None);
    }

    #[tokio::test]
    async fn test_whoami_failure_is_none() {
        let mut session = FakeSession::new();
        assert_eq!(WhoAmIUserDnResolver.resolve_dn(&mut session, "alice").await, None);
    }

    #[tokio::test]
    async fn test_search_single_match() {
        let mut session = FakeSession::new().on_search(
            "(uid=alice)",
            SearchScript::Entries(vec![entry("uid=alice,ou=People,dc=example,dc=com", &[])]),
        );
        let resolver = SearchUserDnResolver::new("ou=People", TEMPLATE);

        let dn = resolver.resolve_dn(&mut session, "alice").await;
        assert_eq!(dn.as_deref(), Some("uid=alice,ou=People,dc=example,dc=com"));

        let log = session.log.lock().unwrap();
        assert_eq!(
            log.searches,
            vec![("ou=People".to_string(), "(uid=alice)".to_string(), vec!["1.1".to_string()])]
        );
    }

    #[tokio::test]
    async fn test_search_no_match() {
        let mut session = FakeSession::new();
        let resolver = SearchUserDnResolver::new("", TEMPLATE);
        assert_eq!(resolver.resolve_dn(&mut session, "nobody").await, None);
        assert_eq!(session.search_count(), 1);
    }

    #[tokio::test]
    async fn test_search_ambiguous_never_picks_first() {
        let mut session = FakeSession::new().on_search(
            "(uid=bob)",
            SearchScript::Entries(vec![
                entry("uid=bob,ou=People,dc=example,dc=com", &[]),
                entry("uid=bob,ou=Contractors,dc=example,dc=com", &[]),
            ]),
        );
        let resolver = SearchUserDnResolver::new("", TEMPLATE);
        assert_eq!(resolver.resolve_dn(&mut session, "bob").await, None);
    }

    #[tokio::test]
    async fn test_search_error_is_none() {
        let mut session = FakeSession::new().on_search(
            "(uid=alice)",
            SearchScript::Fails(vec![entry("uid=alice,dc=example,dc=com", &[])]),
        );
        let resolver = SearchUserDnResolver::new("", TEMPLATE);
        assert_eq!(resolver.resolve_dn(&mut session, "alice").await, None);
    }

    #[tokio::test]
    async fn test_blank_template_disables_search() {
        let mut session = FakeSession::new();
        let resolver = SearchUserDnResolver::new("ou=People", "  ");
        assert_eq!(resolver.resolve_dn(&mut session, "alice").await, None);
        assert_eq!(session.search_count(), 0);
    }

    #[test]
    fn test_filter_escapes_username() {
        let resolver = SearchUserDnResolver::new("", "(&(objectClass=person)(uid={0}))");
        assert_eq!(resolver.filter_for("alice"), "(&(objectClass=person)(uid=alice))");
        assert_eq!(
            resolver.filter_for("a*)(uid=*"),
            "(&(objectClass=person)(uid=a\\2a\\29\\28uid=\\2a))"
        );
    }

    #[test]
    fn test_filter_substitutes_once() {
        let resolver = SearchUserDnResolver::new("", "(uid={username})");
        assert_eq!(resolver.filter_for("a{0}"), "(uid=a{0})");
        assert_eq!(resolver.filter_for("{username}"), "(uid={username})");

        let resolver = SearchUserDnResolver::new("", "(|(uid={0})(mail={username}))");
        assert_eq!(resolver.filter_for("bob"), "(|(uid=bob)(mail=bob))");
    }

    #[test]
    fn test_builder_selects_variant() {
        assert!(!user_dn_resolver(None).identifies_bound_principal());
        assert!(user_dn_resolver(Some(&UserDnResolverConfig::Whoami)).identifies_bound_principal());
        let search = user_dn_resolver(Some(&UserDnResolverConfig::Search {
            search_base: "ou=People".into(),
            search_query_template: TEMPLATE.into(),
        }));
        assert!(format!("{:?}", search).contains("SearchUserDnResolver"));
    }
}
