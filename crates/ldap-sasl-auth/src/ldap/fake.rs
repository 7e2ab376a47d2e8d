//! In-memory directory used by the resolver and authenticator tests

use super::session::{BindRequest, DirectoryConnector, DirectorySession};
use crate::error::{BindError, DirectoryError, SearchError};
use async_trait::async_trait;
use ldap3::asn1::{ASNTag, StructureTag, PL};
use ldap3::exop::Exop;
use ldap3::{Scope, SearchEntry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn entry(dn: &str, attrs: &[(&str, &[&str])]) -> SearchEntry {
    SearchEntry {
        dn: dn.to_string(),
        attrs: attrs
            .iter()
            .map(|(name, values)| {
                (
                    name.to_string(),
                    values.iter().map(|v| v.to_string()).collect(),
                )
            })
            .collect(),
        bin_attrs: HashMap::new(),
    }
}

// Filter choices (RFC 4511 section 4.5.1): and, or, not, equalityMatch, present.
// Other choices never match.
fn matches_filter(entry: &SearchEntry, filter: &StructureTag) -> bool {
    let values = |attr: &[u8]| {
        let attr = String::from_utf8_lossy(attr);
        entry
            .attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&attr))
            .map(|(_, values)| values.clone())
    };

    match (filter.id, &filter.payload) {
        (0, PL::C(inner)) => inner.iter().all(|f| matches_filter(entry, f)),
        (1, PL::C(inner)) => inner.iter().any(|f| matches_filter(entry, f)),
        (2, PL::C(inner)) => inner.first().is_some_and(|f| !matches_filter(entry, f)),
        (3, PL::C(inner)) => match inner.as_slice() {
            [attr, value] => match (&attr.payload, &value.payload) {
                (PL::P(attr), PL::P(value)) => {
                    let value = String::from_utf8_lossy(value);
                    values(attr).is_some_and(|vs| vs.iter().any(|v| v.eq_ignore_ascii_case(&value)))
                }
                _ => false,
            },
            _ => false,
        },
        (7, PL::P(attr)) => values(attr).is_some(),
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub enum SearchScript {
    Entries(Vec<SearchEntry>),
    /// Fails after returning `partial`
    Fails(Vec<SearchEntry>),
}

/// Everything a session was asked to do
#[derive(Debug, Default)]
pub struct SessionLog {
    /// (base, filter, attrs)
    pub searches: Vec<(String, String, Vec<String>)>,
    pub extended: Vec<String>,
    pub closed: usize,
}

#[derive(Clone, Default)]
pub struct FakeSession {
    searches: HashMap<String, SearchScript>,
    directory: Vec<SearchEntry>,
    whoami: Option<Vec<u8>>,
    pub log: Arc<Mutex<SessionLog>>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome of a search by its exact filter
    pub fn on_search(mut self, filter: &str, script: SearchScript) -> Self {
        self.searches.insert(filter.to_string(), script);
        self
    }

    /// Entries matched by evaluating the filter when no script applies
    pub fn with_directory(mut self, entries: Vec<SearchEntry>) -> Self {
        self.directory = entries;
        self
    }

    /// Value returned by the WhoAmI operation; unset means the operation fails
    pub fn with_whoami(mut self, value: &[u8]) -> Self {
        self.whoami = Some(value.to_vec());
        self
    }

    pub fn search_count(&self) -> usize {
        self.log.lock().unwrap().searches.len()
    }
}

#[async_trait]
impl DirectorySession for FakeSession {
    async fn search(
        &mut self,
        base: &str,
        _scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<SearchEntry>, SearchError> {
        self.log.lock().unwrap().searches.push((
            base.to_string(),
            filter.to_string(),
            attrs.iter().map(|a| a.to_string()).collect(),
        ));

        match self.searches.get(filter) {
            Some(SearchScript::Entries(entries)) => Ok(entries.clone()),
            Some(SearchScript::Fails(partial)) => Err(SearchError {
                source: DirectoryError::Operation {
                    code: 3,
                    message: "time limit exceeded".into(),
                },
                partial: partial.clone(),
            }),
            None => {
                let filter = ldap3::parse_filter(filter)
                    .map_err(|_| SearchError::from(DirectoryError::Filter(filter.to_string())))?
                    .into_structure();
                Ok(self
                    .directory
                    .iter()
                    .filter(|entry| matches_filter(entry, &filter))
                    .cloned()
                    .collect())
            }
        }
    }

    async fn extended(&mut self, exop: Exop) -> Result<Exop, DirectoryError> {
        self.log
            .lock()
            .unwrap()
            .extended
            .push(exop.name.clone().unwrap_or_default());

        match &self.whoami {
            Some(value) => Ok(Exop {
                name: None,
                val: Some(value.clone()),
            }),
            None => Err(DirectoryError::Operation {
                code: 2,
                message: "unsupported extended operation".into(),
            }),
        }
    }

    async fn close(&mut self) {
        self.log.lock().unwrap().closed += 1;
    }
}

/// Accepts binds for a fixed set of users
pub struct FakeConnector {
    users: HashMap<String, String>,
    server_mechanisms: Vec<String>,
    unreachable: bool,
    session: FakeSession,
    connects: AtomicUsize,
    binds: Mutex<Vec<(String, String)>>,
}

impl FakeConnector {
    pub fn new(session: FakeSession) -> Self {
        Self {
            users: HashMap::new(),
            server_mechanisms: vec!["DIGEST-MD5".to_string(), "CRAM-MD5".to_string()],
            unreachable: false,
            session,
            connects: AtomicUsize::new(0),
            binds: Mutex::new(Vec::new()),
        }
    }

    pub fn with_user(mut self, username: &str, password: &str) -> Self {
        self.users.insert(username.to_string(), password.to_string());
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// (username, mechanism) of every successful bind
    pub fn binds(&self) -> Vec<(String, String)> {
        self.binds.lock().unwrap().clone()
    }
}

#[async_trait]
impl DirectoryConnector for FakeConnector {
    async fn connect_and_bind(
        &self,
        request: &BindRequest,
    ) -> Result<Box<dyn DirectorySession>, BindError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if self.unreachable || request.servers.is_empty() {
            return Err(DirectoryError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))
            .into());
        }

        let mechanism = request
            .mechanisms
            .iter()
            .find(|m| {
                self.server_mechanisms
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(m))
            })
            .ok_or_else(|| BindError::Rejected("no mutually supported mechanism".into()))?;

        let username = &request.credentials.username;
        match self.users.get(username) {
            Some(password) if *password == request.credentials.password => {}
            _ => return Err(BindError::Rejected("invalid credentials".into())),
        }

        self.binds
            .lock()
            .unwrap()
            .push((username.clone(), mechanism.clone()));
        Ok(Box::new(self.session.clone()))
    }
}
