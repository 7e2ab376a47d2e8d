//! Configuration for ldap-sasl
//!
//! Example:
//! ```toml
//! servers = ["ldap://ldap1.example.com/dc=example,dc=com", "ldap://ldap2.example.com"]
//! mechanisms = "DIGEST-MD5 CRAM-MD5"
//! connection_timeout_ms = 3000
//! read_timeout_ms = 5000
//!
//! [user_dn_resolver]
//! type = "search"
//! search_base = "ou=People"
//! search_query_template = "(uid={username})"
//!
//! [group_resolver]
//! type = "search"
//! search_base = "ou=Groups"
//! prefix = "ROLE_"
//! ```

use crate::types::Credentials;
use crate::validate::parse_mechanisms;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealmConfig {
    /// LDAP server URIs, tried in order
    #[serde(default)]
    pub servers: Vec<String>,

    /// SASL mechanisms, in order of preference
    #[serde(default)]
    pub mechanisms: MechanismList,

    /// Connect timeout in milliseconds (0 = none)
    #[serde(default)]
    pub connection_timeout_ms: u64,

    /// Read timeout in milliseconds (0 = none)
    #[serde(default)]
    pub read_timeout_ms: u64,

    #[serde(default)]
    pub user_dn_resolver: Option<UserDnResolverConfig>,

    #[serde(default)]
    pub group_resolver: Option<GroupResolverConfig>,

    /// Principal used for lookups without the user's password
    #[serde(default, skip_serializing)]
    pub service_account: Option<Credentials>,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    // Older configurations had only these two fields and no resolver sections.
    #[serde(default, skip_serializing)]
    pub group_search_base: Option<String>,

    #[serde(default, skip_serializing)]
    pub group_prefix: Option<String>,
}

impl RealmConfig {
    pub fn new<S: Into<String>>(servers: impl IntoIterator<Item = S>, mechanisms: &str) -> Self {
        let mut config = Self {
            servers: servers.into_iter().map(Into::into).collect(),
            mechanisms: MechanismList::parse(mechanisms),
            ..Default::default()
        };
        config.normalize();
        config
    }

    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::Configuration(format!("Failed to read config {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| crate::Error::Configuration(format!("Failed to parse config: {}", e)))?;
        config.migrate_legacy();
        config.normalize();
        Ok(config)
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.normalize();
        config
    }

    /// Override fields from `LDAP_SASL_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(servers) = var("LDAP_SASL_SERVERS") {
            self.servers = servers.split_whitespace().map(str::to_string).collect();
        }
        if let Some(mechanisms) = var("LDAP_SASL_MECHANISMS") {
            self.mechanisms = MechanismList::parse(&mechanisms);
        }
        if let Some(ms) = var("LDAP_SASL_CONNECTION_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.connection_timeout_ms = ms;
        }
        if let Some(ms) = var("LDAP_SASL_READ_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.read_timeout_ms = ms;
        }
        if let Some(username) = var("LDAP_SASL_SERVICE_USERNAME") {
            let password = var("LDAP_SASL_SERVICE_PASSWORD").unwrap_or_default();
            self.service_account = Some(Credentials::new(username, password));
        }
        if let Some(ca_file) = var("LDAP_SASL_TLS_CA_FILE") {
            self.tls.ca_file = Some(PathBuf::from(ca_file));
        }
        if let Some(level) = var("LDAP_SASL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("LDAP_SASL_LOG_FORMAT") {
            self.logging.format = format;
        }
        self.normalize();
    }

    /// Upgrade the pre-resolver configuration shape.
    ///
    /// A bare `group_search_base` used to imply WhoAmI DN resolution plus a
    /// group search under that base.
    pub fn migrate_legacy(&mut self) {
        let legacy_base = self
            .group_search_base
            .take()
            .filter(|base| !base.trim().is_empty());
        let legacy_prefix = self.group_prefix.take();

        if self.user_dn_resolver.is_some() || self.group_resolver.is_some() {
            return;
        }

        if let Some(search_base) = legacy_base {
            info!("Migrating legacy group search configuration (base={})", search_base);
            self.user_dn_resolver = Some(UserDnResolverConfig::Whoami);
            self.group_resolver = Some(GroupResolverConfig::Search {
                search_base,
                prefix: legacy_prefix,
            });
        }
    }

    /// Trim server URIs and drop blank ones; tidy resolver parameters.
    pub fn normalize(&mut self) {
        self.servers = self
            .servers
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if let Some(GroupResolverConfig::Search { search_base, prefix }) = &mut self.group_resolver {
            *search_base = search_base.trim().to_string();
            *prefix = prefix.as_ref().map(|p| p.trim().to_string());
        }
    }

    pub fn connection_timeout(&self) -> Option<Duration> {
        millis(self.connection_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Ordered SASL mechanism names.
///
/// Accepts either a whitespace/comma separated string or a list; entries are
/// trimmed and blank entries dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MechanismList(Vec<String>);

impl MechanismList {
    pub fn parse(mechanisms: &str) -> Self {
        Self(parse_mechanisms(mechanisms))
    }

    pub fn from_list<S: AsRef<str>>(mechanisms: &[S]) -> Self {
        Self(
            mechanisms
                .iter()
                .flat_map(|m| parse_mechanisms(m.as_ref()))
                .collect(),
        )
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Space separated, as used in logs and on the wire to negotiation
    pub fn joined(&self) -> String {
        self.0.join(" ")
    }
}

impl<'de> Deserialize<'de> for MechanismList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Joined(String),
            List(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Joined(s) => Self::parse(&s),
            Raw::List(list) => Self::from_list(&list),
        })
    }
}

/// How the user's DN is determined after the bind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserDnResolverConfig {
    None,
    /// RFC 4532 "Who am I?" extended operation
    Whoami,
    /// Subtree search for the user entry
    Search {
        #[serde(default)]
        search_base: String,
        /// Filter template; `{username}` (or `{0}`) is replaced by the username
        #[serde(default)]
        search_query_template: String,
    },
}

/// How the user's group authorities are determined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupResolverConfig {
    None,
    /// Subtree search for groupOfNames / groupOfUniqueNames entries naming the user
    Search {
        #[serde(default)]
        search_base: String,
        #[serde(default)]
        prefix: Option<String>,
    },
}

/// TLS settings for `ldaps://` servers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM file with the CA certificates trusted for directory servers
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_new_trims_and_drops_blanks() {
        let config = RealmConfig::new(
            ["  ldap:///  ", "", "   ", "ldaps:///"],
            "  DIGEST-MD5 ,  CRAM-MD5  ",
        );
        assert_eq!(config.servers, vec!["ldap:///", "ldaps:///"]);
        assert_eq!(config.mechanisms.joined(), "DIGEST-MD5 CRAM-MD5");
    }

    #[test]
    fn test_empty_config() {
        let config = RealmConfig::from_toml_str("").unwrap();
        assert!(config.servers.is_empty());
        assert!(config.mechanisms.is_empty());
        assert_eq!(config.mechanisms.joined(), "");
        assert!(config.connection_timeout().is_none());
        assert!(config.user_dn_resolver.is_none());
    }

    #[test]
    fn test_mechanisms_as_string_or_list() {
        let config = RealmConfig::from_toml_str(r#"mechanisms = "DIGEST-MD5, PLAIN""#).unwrap();
        assert_eq!(config.mechanisms.as_slice(), ["DIGEST-MD5", "PLAIN"]);

        let config =
            RealmConfig::from_toml_str(r#"mechanisms = [" CRAM-MD5 ", "", "PLAIN"]"#).unwrap();
        assert_eq!(config.mechanisms.as_slice(), ["CRAM-MD5", "PLAIN"]);
    }

    #[test]
    fn test_resolver_sections() {
        let config = RealmConfig::from_toml_str(
            r#"
            servers = ["ldap://localhost"]
            mechanisms = "DIGEST-MD5"
            connection_timeout_ms = 1500

            [user_dn_resolver]
            type = "search"
            search_base = "ou=People,dc=example,dc=com"
            search_query_template = "(uid={username})"

            [group_resolver]
            type = "search"
            search_base = "  ou=Groups,dc=example,dc=com "
            prefix = " ROLE_ "
            "#,
        )
        .unwrap();

        assert_eq!(config.connection_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(
            config.user_dn_resolver,
            Some(UserDnResolverConfig::Search {
                search_base: "ou=People,dc=example,dc=com".to_string(),
                search_query_template: "(uid={username})".to_string(),
            })
        );
        assert_eq!(
            config.group_resolver,
            Some(GroupResolverConfig::Search {
                search_base: "ou=Groups,dc=example,dc=com".to_string(),
                prefix: Some("ROLE_".to_string()),
            })
        );
    }

    #[test]
    fn test_legacy_group_settings_are_migrated() {
        let config = RealmConfig::from_toml_str(
            r#"
            servers = ["ldap://localhost"]
            mechanisms = "DIGEST-MD5"
            group_search_base = "ou=Groups,dc=example,dc=com"
            group_prefix = "ROLE_"
            "#,
        )
        .unwrap();

        assert_eq!(config.user_dn_resolver, Some(UserDnResolverConfig::Whoami));
        assert_eq!(
            config.group_resolver,
            Some(GroupResolverConfig::Search {
                search_base: "ou=Groups,dc=example,dc=com".to_string(),
                prefix: Some("ROLE_".to_string()),
            })
        );
        assert!(config.group_search_base.is_none());
        assert!(config.group_prefix.is_none());
    }

    #[test]
    fn test_legacy_settings_do_not_override_resolvers() {
        let config = RealmConfig::from_toml_str(
            r#"
            group_search_base = "ou=Groups,dc=example,dc=com"

            [user_dn_resolver]
            type = "none"
            "#,
        )
        .unwrap();

        assert_eq!(config.user_dn_resolver, Some(UserDnResolverConfig::None));
        assert!(config.group_resolver.is_none());
    }

    #[test]
    fn test_blank_legacy_base_is_ignored() {
        let config = RealmConfig::from_toml_str(r#"group_search_base = "  ""#).unwrap();
        assert!(config.user_dn_resolver.is_none());
        assert!(config.group_resolver.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LDAP_SASL_SERVERS", "ldap://a.example.com  ldap://b.example.com"),
            ("LDAP_SASL_MECHANISMS", "CRAM-MD5,PLAIN"),
            ("LDAP_SASL_READ_TIMEOUT_MS", "250"),
            ("LDAP_SASL_SERVICE_USERNAME", "svc"),
            ("LDAP_SASL_SERVICE_PASSWORD", "pw"),
        ]
        .into_iter()
        .collect();

        let mut config = RealmConfig::default();
        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.servers, vec!["ldap://a.example.com", "ldap://b.example.com"]);
        assert_eq!(config.mechanisms.as_slice(), ["CRAM-MD5", "PLAIN"]);
        assert_eq!(config.read_timeout(), Some(Duration::from_millis(250)));
        let account = config.service_account.unwrap();
        assert_eq!(account.username, "svc");
        assert_eq!(account.password, "pw");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "servers = [\"ldap://localhost:389\"]").unwrap();
        writeln!(file, "mechanisms = \"PLAIN\"").unwrap();

        let config = RealmConfig::from_file(file.path()).unwrap();
        assert_eq!(config.servers, vec!["ldap://localhost:389"]);

        let err = RealmConfig::from_file("/nonexistent/ldap-sasl.toml").unwrap_err();
        assert!(matches!(err, crate::Error::Configuration(_)));
    }
}
