//! Client-side SASL mechanisms
//!
//! Each mechanism is a small state machine driven by the bind loop in
//! [`connection`](super::connection): an optional initial response, any
//! number of challenge/response steps, then a final check of whatever the
//! server sent along with its success result.

use crate::error::DirectoryError;
use crate::hash::{hmac_md5_hex, md5, md5_hex};
use base64::{engine::general_purpose::STANDARD, Engine};
use ldap_sasl_core::Credentials;

/// Mechanisms this client can drive, in no particular order
pub const SUPPORTED_MECHANISMS: &[&str] = &["DIGEST-MD5", "CRAM-MD5", "PLAIN", "EXTERNAL"];

pub fn is_supported(mechanism: &str) -> bool {
    SUPPORTED_MECHANISMS
        .iter()
        .any(|m| m.eq_ignore_ascii_case(mechanism))
}

/// The configured mechanisms this client implements, preserving preference order.
pub fn supported_subset(configured: &[String]) -> Vec<String> {
    configured
        .iter()
        .filter(|m| is_supported(m))
        .cloned()
        .collect()
}

pub trait SaslMechanism: Send {
    fn name(&self) -> &'static str;

    /// Credentials for the first BindRequest, if the mechanism is client-first
    fn initial_response(&mut self) -> Option<Vec<u8>>;

    /// Answer a server challenge (result code 14)
    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>, DirectoryError>;

    /// Check the server's final credentials once the bind succeeded
    fn finish(&mut self, server_creds: Option<&[u8]>) -> Result<(), DirectoryError>;
}

/// Instantiate a mechanism by name. `host` is the server host, used for
/// the DIGEST-MD5 digest-uri.
pub fn new_mechanism(
    name: &str,
    credentials: &Credentials,
    host: &str,
) -> Option<Box<dyn SaslMechanism>> {
    let mechanism: Box<dyn SaslMechanism> = match name.to_ascii_uppercase().as_str() {
        "DIGEST-MD5" => Box::new(DigestMd5::new(credentials, host)),
        "CRAM-MD5" => Box::new(CramMd5::new(credentials)),
        "PLAIN" => Box::new(Plain::new(credentials)),
        "EXTERNAL" => Box::new(External),
        _ => return None,
    };
    Some(mechanism)
}

// ============================================================================
// PLAIN (RFC 4616)
// ============================================================================

pub struct Plain {
    username: String,
    password: String,
}

impl Plain {
    pub fn new(credentials: &Credentials) -> Self {
        Self {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        }
    }
}

impl SaslMechanism for Plain {
    fn name(&self) -> &'static str {
        "PLAIN"
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        let mut message = Vec::with_capacity(self.username.len() + self.password.len() + 2);
        message.push(0);
        message.extend_from_slice(self.username.as_bytes());
        message.push(0);
        message.extend_from_slice(self.password.as_bytes());
        Some(message)
    }

    fn step(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, DirectoryError> {
        Err(DirectoryError::Sasl("PLAIN does not expect a challenge".into()))
    }

    fn finish(&mut self, _server_creds: Option<&[u8]>) -> Result<(), DirectoryError> {
        Ok(())
    }
}

// ============================================================================
// CRAM-MD5 (RFC 2195)
// ============================================================================

pub struct CramMd5 {
    username: String,
    password: String,
}

impl CramMd5 {
    pub fn new(credentials: &Credentials) -> Self {
        Self {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        }
    }
}

impl SaslMechanism for CramMd5 {
    fn name(&self) -> &'static str {
        "CRAM-MD5"
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>, DirectoryError> {
        let digest = hmac_md5_hex(self.password.as_bytes(), challenge);
        Ok(format!("{} {}", self.username, digest).into_bytes())
    }

    fn finish(&mut self, _server_creds: Option<&[u8]>) -> Result<(), DirectoryError> {
        Ok(())
    }
}

// ============================================================================
// EXTERNAL (RFC 4422 Appendix A)
// ============================================================================

/// Identity comes from the transport; no authorization identity is requested.
pub struct External;

impl SaslMechanism for External {
    fn name(&self) -> &'static str {
        "EXTERNAL"
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        Some(Vec::new())
    }

    fn step(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, DirectoryError> {
        Ok(Vec::new())
    }

    fn finish(&mut self, _server_creds: Option<&[u8]>) -> Result<(), DirectoryError> {
        Ok(())
    }
}

// ============================================================================
// DIGEST-MD5 (RFC 2831), qop=auth only
// ============================================================================

const NONCE_COUNT: &str = "00000001";

/// Bytes hashed into A1: ISO 8859-1 when every character fits, UTF-8 otherwise
/// (RFC 2831 section 2.1.2.1).
fn credential_bytes(text: &str) -> Vec<u8> {
    if text.chars().all(|c| c <= '\u{ff}') {
        text.chars().map(|c| c as u8).collect()
    } else {
        text.as_bytes().to_vec()
    }
}

pub struct DigestMd5 {
    username: String,
    password: String,
    service: String,
    host: String,
    cnonce: Option<String>,
    expected_rspauth: Option<String>,
    verified: bool,
}

impl DigestMd5 {
    pub fn new(credentials: &Credentials, host: &str) -> Self {
        Self {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            service: "ldap".to_string(),
            host: host.to_string(),
            cnonce: None,
            expected_rspauth: None,
            verified: false,
        }
    }

    #[cfg(test)]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Use a fixed client nonce instead of a random one
    pub fn with_cnonce(mut self, cnonce: impl Into<String>) -> Self {
        self.cnonce = Some(cnonce.into());
        self
    }

    fn digest_uri(&self) -> String {
        format!("{}/{}", self.service, self.host)
    }

    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>, DirectoryError> {
        let challenge = std::str::from_utf8(challenge)
            .map_err(|_| DirectoryError::Sasl("DIGEST-MD5 challenge is not UTF-8".into()))?;
        let directives = parse_directives(challenge)?;
        let directive = |key: &str| {
            directives
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.as_str())
        };

        let nonce = directive("nonce")
            .ok_or_else(|| DirectoryError::Sasl("DIGEST-MD5 challenge has no nonce".into()))?
            .to_string();
        if let Some(algorithm) = directive("algorithm") {
            if !algorithm.eq_ignore_ascii_case("md5-sess") {
                return Err(DirectoryError::Sasl(format!(
                    "unsupported DIGEST-MD5 algorithm: {}",
                    algorithm
                )));
            }
        }
        let qop_offered = directive("qop").unwrap_or("auth");
        if !qop_offered
            .split(',')
            .any(|q| q.trim().eq_ignore_ascii_case("auth"))
        {
            return Err(DirectoryError::Sasl(format!(
                "server does not offer qop=auth (offered: {})",
                qop_offered
            )));
        }
        let utf8 = directive("charset").is_some_and(|c| c.eq_ignore_ascii_case("utf-8"));
        let realm = directive("realm").map(str::to_string);

        let cnonce = self
            .cnonce
            .get_or_insert_with(|| STANDARD.encode(rand::random::<[u8; 16]>()))
            .clone();
        let digest_uri = self.digest_uri();

        let mut a1 = md5(&credential_bytes(&format!(
            "{}:{}:{}",
            self.username,
            realm.as_deref().unwrap_or(""),
            self.password
        )))
        .to_vec();
        a1.extend_from_slice(format!(":{}:{}", nonce, cnonce).as_bytes());
        let ha1 = md5_hex(&a1);

        let kd = |a2: &str| {
            md5_hex(
                format!(
                    "{}:{}:{}:{}:auth:{}",
                    ha1,
                    nonce,
                    NONCE_COUNT,
                    cnonce,
                    md5_hex(a2.as_bytes())
                )
                .as_bytes(),
            )
        };
        let response = kd(&format!("AUTHENTICATE:{}", digest_uri));
        self.expected_rspauth = Some(kd(&format!(":{}", digest_uri)));

        let mut message = String::new();
        if utf8 {
            message.push_str("charset=utf-8,");
        }
        message.push_str(&format!("username=\"{}\",", quote(&self.username)));
        if let Some(realm) = &realm {
            message.push_str(&format!("realm=\"{}\",", quote(realm)));
        }
        message.push_str(&format!(
            "nonce=\"{}\",nc={},cnonce=\"{}\",digest-uri=\"{}\",response={},qop=auth",
            quote(&nonce),
            NONCE_COUNT,
            quote(&cnonce),
            quote(&digest_uri),
            response
        ));

        Ok(message.into_bytes())
    }

    fn verify(&mut self, server_creds: &[u8]) -> Result<(), DirectoryError> {
        let text = std::str::from_utf8(server_creds)
            .map_err(|_| DirectoryError::Sasl("DIGEST-MD5 rspauth is not UTF-8".into()))?;
        let directives = parse_directives(text)?;
        let rspauth = directives
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("rspauth"))
            .map(|(_, v)| v.as_str());

        match (rspauth, self.expected_rspauth.as_deref()) {
            (Some(got), Some(expected)) if got.eq_ignore_ascii_case(expected) => {
                self.verified = true;
                Ok(())
            }
            (Some(_), _) => Err(DirectoryError::Sasl(
                "DIGEST-MD5 server authentication failed".into(),
            )),
            (None, _) => Err(DirectoryError::Sasl(
                "DIGEST-MD5 final message has no rspauth".into(),
            )),
        }
    }
}

impl SaslMechanism for DigestMd5 {
    fn name(&self) -> &'static str {
        "DIGEST-MD5"
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>, DirectoryError> {
        if self.expected_rspauth.is_none() {
            self.respond(challenge)
        } else {
            self.verify(challenge)?;
            Ok(Vec::new())
        }
    }

    fn finish(&mut self, server_creds: Option<&[u8]>) -> Result<(), DirectoryError> {
        if self.verified {
            return Ok(());
        }
        match server_creds {
            Some(creds) if !creds.is_empty() => self.verify(creds),
            _ => Err(DirectoryError::Sasl(
                "server completed DIGEST-MD5 without rspauth".into(),
            )),
        }
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Split a `key=value, key="quoted value"` list.
fn parse_directives(input: &str) -> Result<Vec<(String, String)>, DirectoryError> {
    let mut directives = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if chars.next() != Some('=') {
            return Err(DirectoryError::Sasl(format!(
                "malformed DIGEST-MD5 directive: {}",
                key.trim()
            )));
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    c => value.push(c),
                }
            }
            if !closed {
                return Err(DirectoryError::Sasl("unterminated quoted string".into()));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            value = value.trim_end().to_string();
        }

        directives.push((key.trim().to_string(), value));
    }

    Ok(directives)
}
