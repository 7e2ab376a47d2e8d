//! Group authority resolution

use super::session::DirectorySession;
use async_trait::async_trait;
use ldap3::{Scope, SearchEntry};
use ldap_sasl_core::{Authority, GroupResolverConfig};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

const GROUP_NAME_ATTRIBUTE: &str = "cn";

#[async_trait]
pub trait GroupResolver: Send + Sync + fmt::Debug {
    /// Authorities for the user identified by `dn`. Never fails; a failed
    /// search yields whatever was collected before the failure.
    async fn resolve_groups(
        &self,
        session: &mut dyn DirectorySession,
        dn: Option<&str>,
        username: &str,
    ) -> Vec<Authority>;
}

pub fn group_resolver(config: Option<&GroupResolverConfig>) -> Arc<dyn GroupResolver> {
    match config {
        None | Some(GroupResolverConfig::None) => Arc::new(NoGroupResolver),
        Some(GroupResolverConfig::Search {
            search_base,
            prefix,
        }) => Arc::new(SearchGroupResolver::new(search_base.clone(), prefix.clone())),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoGroupResolver;

#[async_trait]
impl GroupResolver for NoGroupResolver {
    async fn resolve_groups(
        &self,
        _session: &mut dyn DirectorySession,
        _dn: Option<&str>,
        _username: &str,
    ) -> Vec<Authority> {
        Vec::new()
    }
}

/// Finds `groupOfNames` and `groupOfUniqueNames` entries listing the user's DN.
#[derive(Debug, Clone)]
pub struct SearchGroupResolver {
    search_base: String,
    prefix: Option<String>,
}

impl SearchGroupResolver {
    pub fn new(search_base: impl Into<String>, prefix: Option<String>) -> Self {
        Self {
            search_base: search_base.into(),
            prefix: prefix.filter(|p| !p.is_empty()),
        }
    }

    pub fn filter_for(dn: &str) -> String {
        let dn = ldap3::ldap_escape(dn);
        format!(
            "(|(&(objectClass=groupOfUniqueNames)(uniqueMember={dn}))(&(objectClass=groupOfNames)(member={dn})))",
            dn = dn
        )
    }

    fn authorities(&self, entries: Vec<SearchEntry>) -> Vec<Authority> {
        entries
            .into_iter()
            .filter_map(|entry| {
                let name = entry
                    .attrs
                    .iter()
                    .find(|(attr, _)| attr.eq_ignore_ascii_case(GROUP_NAME_ATTRIBUTE))
                    .and_then(|(_, values)| values.first());
                match name {
                    Some(name) => Some(Authority::from_group(name, self.prefix.as_deref())),
                    None => {
                        warn!("Group {} has no {} value, skipped", entry.dn, GROUP_NAME_ATTRIBUTE);
                        None
                    }
                }
            })
            .collect()
    }
}

#[async_trait]
impl GroupResolver for SearchGroupResolver {
    async fn resolve_groups(
        &self,
        session: &mut dyn DirectorySession,
        dn: Option<&str>,
        username: &str,
    ) -> Vec<Authority> {
        let dn = match dn {
            Some(dn) => dn,
            None => {
                debug!("No DN for {}, group search skipped", username);
                return Vec::new();
            }
        };

        let filter = Self::filter_for(dn);
        debug!("Searching groups under '{}' with filter {}", self.search_base, filter);

        match session
            .search(&self.search_base, Scope::Subtree, &filter, &[GROUP_NAME_ATTRIBUTE])
            .await
        {
            Ok(entries) => {
                let authorities = self.authorities(entries);
                debug!("Found {} groups for {}", authorities.len(), username);
                authorities
            }
            Err(e) => {
                warn!(
                    "Group search for {} failed after {} entries: {}",
                    username,
                    e.partial.len(),
                    e
                );
                self.authorities(e.partial)
            }
        }
    }
}
