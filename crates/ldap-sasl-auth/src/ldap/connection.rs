//! LDAP connections
//!
//! [`LdapConnector`] walks the configured server list, opens a TCP or TLS
//! transport to the first reachable server, negotiates a SASL mechanism
//! against the root DSE and runs the bind exchange. The bound
//! [`LdapConnection`] then serves the resolvers' searches and extended
//! operations until it is closed.

use super::protocol::{
    extended_request, op, parse_search_entry, rc, sasl_bind_request, search_request,
    unbind_request, LdapCodec, LdapMessage, MessageId, OpResult,
};
use super::sasl::{new_mechanism, supported_subset};
use super::session::{BindRequest, DirectoryConnector, DirectorySession};
use crate::error::{BindError, DirectoryError, SearchError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use ldap3::asn1::Tag;
use ldap3::exop::Exop;
use ldap3::{Scope, SearchEntry};
use ldap_sasl_core::config::TlsConfig;
use ldap_sasl_core::validate::uri_base_dn;
use ldap_sasl_core::{Credentials, DEFAULT_LDAPS_PORT, DEFAULT_LDAP_PORT};
use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{self, pki_types::ServerName, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};
use url::Url;

/// Upper bound on challenge/response rounds in one bind
const MAX_BIND_STEPS: usize = 8;

const ROOT_DSE_MECHANISMS: &str = "supportedSASLMechanisms";

/// A byte stream an LDAP session can run over
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Run `fut` under an optional deadline.
async fn with_timeout<T, F>(limit: Option<Duration>, fut: F) -> Result<T, DirectoryError>
where
    F: Future<Output = Result<T, DirectoryError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| DirectoryError::Timeout(limit))?,
        None => fut.await,
    }
}

// ============================================================================
// Connection
// ============================================================================

/// One LDAPv3 connection
pub struct LdapConnection {
    framed: Framed<Box<dyn Transport>, LdapCodec>,
    last_id: MessageId,
    naming_context: String,
    read_timeout: Option<Duration>,
    closed: bool,
}

impl LdapConnection {
    /// Wrap an established transport. `naming_context` is the DN relative
    /// search bases are resolved beneath.
    pub fn new<T: Transport + 'static>(
        stream: T,
        naming_context: impl Into<String>,
        read_timeout: Option<Duration>,
    ) -> Self {
        let stream: Box<dyn Transport> = Box::new(stream);
        Self {
            framed: Framed::new(stream, LdapCodec),
            last_id: 0,
            naming_context: naming_context.into(),
            read_timeout,
            closed: false,
        }
    }

    pub fn naming_context(&self) -> &str {
        &self.naming_context
    }

    /// Absolute DN for a search base given relative to the naming context
    pub fn resolve_base(&self, base: &str) -> String {
        let base = base.trim();
        match (base.is_empty(), self.naming_context.is_empty()) {
            (true, _) => self.naming_context.clone(),
            (false, true) => base.to_string(),
            (false, false) => format!("{},{}", base, self.naming_context),
        }
    }

    fn next_id(&mut self) -> MessageId {
        self.last_id = if self.last_id == MessageId::MAX {
            1
        } else {
            self.last_id + 1
        };
        self.last_id
    }

    async fn send(&mut self, op: Tag) -> Result<MessageId, DirectoryError> {
        if self.closed {
            return Err(DirectoryError::Closed);
        }
        let id = self.next_id();
        self.framed.send((id, op)).await?;
        Ok(id)
    }

    /// Next message answering request `id`
    async fn receive(&mut self, id: MessageId) -> Result<LdapMessage, DirectoryError> {
        loop {
            let next = match self.read_timeout {
                Some(limit) => tokio::time::timeout(limit, self.framed.next())
                    .await
                    .map_err(|_| DirectoryError::Timeout(limit))?,
                None => self.framed.next().await,
            };

            let message = match next {
                Some(message) => message?,
                None => return Err(DirectoryError::Closed),
            };

            if message.id == 0 {
                // Unsolicited notification; the only one defined is the notice of disconnection
                warn!("Server sent an unsolicited notification, closing");
                self.closed = true;
                return Err(DirectoryError::Closed);
            }
            if message.id != id {
                debug!("Ignoring response to message {}", message.id);
                continue;
            }
            return Ok(message);
        }
    }

    async fn sasl_bind_step(
        &mut self,
        mechanism: &str,
        credentials: Option<&[u8]>,
    ) -> Result<OpResult, DirectoryError> {
        let id = self.send(sasl_bind_request(mechanism, credentials)).await?;
        let message = self.receive(id).await?;
        if message.op_id() != Some(op::BIND_RESPONSE) {
            return Err(DirectoryError::Protocol(format!(
                "expected BindResponse, got operation {:?}",
                message.op_id()
            )));
        }
        Ok(OpResult::parse(message.op)?)
    }

    /// SASL mechanisms advertised in the root DSE
    pub async fn server_mechanisms(&mut self) -> Result<Vec<String>, SearchError> {
        let entries = self
            .search_absolute("", Scope::Base, "(objectClass=*)", &[ROOT_DSE_MECHANISMS])
            .await?;

        Ok(entries
            .into_iter()
            .next()
            .and_then(|entry| {
                entry
                    .attrs
                    .into_iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(ROOT_DSE_MECHANISMS))
                    .map(|(_, values)| values)
            })
            .unwrap_or_default())
    }

    /// Pick a mechanism from `mechanisms` (in preference order) and bind with it.
    pub async fn sasl_bind(
        &mut self,
        mechanisms: &[String],
        credentials: &Credentials,
        host: &str,
    ) -> Result<(), BindError> {
        let fallback = mechanisms
            .first()
            .ok_or_else(|| BindError::UnsupportedMechanism(String::new()))?;

        let chosen = match self.server_mechanisms().await {
            Ok(advertised) if !advertised.is_empty() => mechanisms
                .iter()
                .find(|m| advertised.iter().any(|a| a.eq_ignore_ascii_case(m)))
                .ok_or_else(|| {
                    BindError::Rejected(format!(
                        "Server supports none of the configured SASL mechanisms ({}); it offers: {}",
                        mechanisms.join(" "),
                        advertised.join(" ")
                    ))
                })?,
            Ok(_) => {
                debug!("Root DSE lists no SASL mechanisms, trying {}", fallback);
                fallback
            }
            Err(SearchError {
                source: DirectoryError::Operation { code, message },
                ..
            }) => {
                debug!(
                    "Root DSE not readable (result code {}: {}), trying {}",
                    code, message, fallback
                );
                fallback
            }
            Err(e) => return Err(e.source.into()),
        };

        let mut mechanism = new_mechanism(chosen, credentials, host)
            .ok_or_else(|| BindError::UnsupportedMechanism(chosen.clone()))?;
        debug!(
            "Binding as {} with SASL {}",
            credentials.username,
            mechanism.name()
        );

        let mut response = mechanism.initial_response();
        for _ in 0..MAX_BIND_STEPS {
            let result = self
                .sasl_bind_step(mechanism.name(), response.as_deref())
                .await?;

            match result.code {
                rc::SUCCESS => {
                    mechanism.finish(result.sasl_creds.as_deref())?;
                    return Ok(());
                }
                rc::SASL_BIND_IN_PROGRESS => {
                    let challenge = result.sasl_creds.unwrap_or_default();
                    response = Some(mechanism.step(&challenge)?);
                }
                rc::AUTH_METHOD_NOT_SUPPORTED
                | rc::INAPPROPRIATE_AUTHENTICATION
                | rc::INVALID_CREDENTIALS => {
                    let message = if result.message.is_empty() {
                        "Invalid credentials".to_string()
                    } else {
                        result.message
                    };
                    return Err(BindError::Rejected(format!(
                        "{} (result code {})",
                        message, result.code
                    )));
                }
                _ => return Err(result.into_error().into()),
            }
        }

        Err(DirectoryError::Protocol(format!(
            "SASL {} did not complete within {} rounds",
            mechanism.name(),
            MAX_BIND_STEPS
        ))
        .into())
    }

    /// Search with an absolute base. Entries received before a failure are
    /// returned in the error.
    async fn search_absolute(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<SearchEntry>, SearchError> {
        let request = search_request(base, scope, filter, attrs)?;
        let id = self.send(request).await?;

        let mut entries = Vec::new();
        loop {
            let message = match self.receive(id).await {
                Ok(message) => message,
                Err(source) => {
                    return Err(SearchError {
                        source,
                        partial: entries,
                    })
                }
            };

            match message.op_id() {
                Some(op::SEARCH_RESULT_ENTRY) => match parse_search_entry(message.op) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        return Err(SearchError {
                            source: e.into(),
                            partial: entries,
                        })
                    }
                },
                Some(op::SEARCH_RESULT_REFERENCE) => {
                    debug!("Search continuation reference not followed");
                }
                Some(op::INTERMEDIATE_RESPONSE) => {}
                Some(op::SEARCH_RESULT_DONE) => {
                    let result = match OpResult::parse(message.op) {
                        Ok(result) => result,
                        Err(e) => {
                            return Err(SearchError {
                                source: e.into(),
                                partial: entries,
                            })
                        }
                    };
                    return if result.is_success() {
                        Ok(entries)
                    } else {
                        Err(SearchError {
                            source: result.into_error(),
                            partial: entries,
                        })
                    };
                }
                other => {
                    return Err(SearchError {
                        source: DirectoryError::Protocol(format!(
                            "unexpected operation {:?} in search response",
                            other
                        )),
                        partial: entries,
                    })
                }
            }
        }
    }
}

#[async_trait]
impl DirectorySession for LdapConnection {
    async fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<SearchEntry>, SearchError> {
        let base = self.resolve_base(base);
        self.search_absolute(&base, scope, filter, attrs).await
    }

    async fn extended(&mut self, exop: Exop) -> Result<Exop, DirectoryError> {
        let id = self.send(extended_request(exop)).await?;
        let message = self.receive(id).await?;
        if message.op_id() != Some(op::EXTENDED_RESPONSE) {
            return Err(DirectoryError::Protocol(format!(
                "expected ExtendedResponse, got operation {:?}",
                message.op_id()
            )));
        }

        let result = OpResult::parse(message.op)?;
        if !result.is_success() {
            return Err(result.into_error());
        }
        Ok(Exop {
            name: result.response_name,
            val: result.response_value,
        })
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.send(unbind_request()).await {
            debug!("Unbind failed: {}", e);
        }
        self.closed = true;
        if let Err(e) = SinkExt::<(MessageId, Tag)>::close(&mut self.framed).await {
            debug!("Closing the connection failed: {}", e);
        }
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Opens bound sessions over TCP (`ldap://`) or TLS (`ldaps://`).
#[derive(Clone, Default)]
pub struct LdapConnector {
    tls: Option<TlsConnector>,
}

impl LdapConnector {
    /// Build a connector. `ldaps` servers are only usable when a CA file is configured.
    pub fn new(tls: &TlsConfig) -> Result<Self, DirectoryError> {
        let tls = match &tls.ca_file {
            Some(ca_file) => Some(tls_connector(ca_file)?),
            None => None,
        };
        Ok(Self { tls })
    }

    async fn open(
        &self,
        uri: &str,
        request: &BindRequest,
    ) -> Result<(LdapConnection, String), DirectoryError> {
        let url = Url::parse(uri.trim()).map_err(|e| DirectoryError::Uri(format!("{}: {}", uri, e)))?;
        let secure = url.scheme().eq_ignore_ascii_case("ldaps");
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.trim_start_matches('[').trim_end_matches(']'),
            _ => "localhost",
        }
        .to_string();
        let port = url
            .port()
            .unwrap_or(if secure { DEFAULT_LDAPS_PORT } else { DEFAULT_LDAP_PORT });
        let naming_context = uri_base_dn(&url).map_err(DirectoryError::Uri)?;

        let tls = if secure {
            let connector = self.tls.clone().ok_or_else(|| {
                DirectoryError::Tls("ldaps requires tls.ca_file to be configured".into())
            })?;
            let server_name = ServerName::try_from(host.clone())
                .map_err(|e| DirectoryError::Tls(format!("{}: {}", host, e)))?;
            Some((connector, server_name))
        } else {
            None
        };

        debug!("Connecting to {}:{}", host, port);
        let stream = with_timeout(request.connection_timeout, async {
            let tcp = TcpStream::connect((host.as_str(), port)).await?;
            tcp.set_nodelay(true)?;
            let stream: Box<dyn Transport> = match tls {
                Some((connector, server_name)) => Box::new(connector.connect(server_name, tcp).await?),
                None => Box::new(tcp),
            };
            Ok::<_, DirectoryError>(stream)
        })
        .await?;

        Ok((
            LdapConnection::new(stream, naming_context, request.read_timeout),
            host,
        ))
    }
}

#[async_trait]
impl DirectoryConnector for LdapConnector {
    async fn connect_and_bind(
        &self,
        request: &BindRequest,
    ) -> Result<Box<dyn DirectorySession>, BindError> {
        let mechanisms = supported_subset(&request.mechanisms);
        if mechanisms.is_empty() {
            return Err(BindError::UnsupportedMechanism(request.mechanisms.join(" ")));
        }

        let mut last_error = None;
        for uri in &request.servers {
            match self.open(uri, request).await {
                Ok((mut connection, host)) => {
                    debug!("Connected to {}", uri);
                    return match connection
                        .sasl_bind(&mechanisms, &request.credentials, &host)
                        .await
                    {
                        Ok(()) => {
                            info!("Bound to {} as {}", uri, request.credentials.username);
                            Ok(Box::new(connection))
                        }
                        Err(e) => {
                            connection.close().await;
                            Err(e)
                        }
                    };
                }
                Err(e) => {
                    warn!("Cannot connect to {}: {}", uri, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| DirectoryError::Uri("no LDAP server configured".into()))
            .into())
    }
}

fn tls_connector(ca_file: &Path) -> Result<TlsConnector, DirectoryError> {
    let file = File::open(ca_file).map_err(|e| {
        DirectoryError::Tls(format!("Failed to open CA file {:?}: {}", ca_file, e))
    })?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| DirectoryError::Tls(format!("Failed to parse CA certificates: {}", e)))?;
    if certs.is_empty() {
        return Err(DirectoryError::Tls(format!(
            "No certificates found in {:?}",
            ca_file
        )));
    }

    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| DirectoryError::Tls(format!("Failed to add CA certificate: {}", e)))?;
    }
    debug!("Loaded {} trusted CA certificate(s)", roots.len());

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}
