//! LDAPv3 message codec
//!
//! BER framing for `LDAPMessage` envelopes plus builders and parsers for the
//! operations the authenticator uses: SASL bind, search, extended operations
//! and unbind (RFC 4511).

use crate::error::DirectoryError;
use bytes::BytesMut;
use ldap3::asn1::{
    parse_tag, write, ASNTag, Boolean, Enumerated, Integer, Null, OctetString, Sequence,
    StructureTag, Tag, TagClass, PL,
};
use ldap3::exop::Exop;
use ldap3::{Scope, SearchEntry};
use std::collections::HashMap;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

pub type MessageId = i32;

/// Upper bound for a single incoming message
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// protocolOp tags ([APPLICATION n])
pub mod op {
    pub const BIND_REQUEST: u64 = 0;
    pub const BIND_RESPONSE: u64 = 1;
    pub const UNBIND_REQUEST: u64 = 2;
    pub const SEARCH_REQUEST: u64 = 3;
    pub const SEARCH_RESULT_ENTRY: u64 = 4;
    pub const SEARCH_RESULT_DONE: u64 = 5;
    pub const SEARCH_RESULT_REFERENCE: u64 = 19;
    pub const EXTENDED_REQUEST: u64 = 23;
    pub const EXTENDED_RESPONSE: u64 = 24;
    pub const INTERMEDIATE_RESPONSE: u64 = 25;
}

/// Result codes (RFC 4511 Appendix A)
pub mod rc {
    pub const SUCCESS: u32 = 0;
    #[cfg(test)]
    pub const SIZE_LIMIT_EXCEEDED: u32 = 4;
    pub const AUTH_METHOD_NOT_SUPPORTED: u32 = 7;
    pub const SASL_BIND_IN_PROGRESS: u32 = 14;
    pub const INAPPROPRIATE_AUTHENTICATION: u32 = 48;
    pub const INVALID_CREDENTIALS: u32 = 49;
}

// derefAliases: always
const DEREF_ALWAYS: i64 = 3;

/// A decoded `LDAPMessage`; controls are not used and are dropped
#[derive(Debug, Clone)]
pub struct LdapMessage {
    pub id: MessageId,
    pub op: StructureTag,
}

impl LdapMessage {
    fn from_tag(tag: StructureTag) -> io::Result<Self> {
        if !is(&tag, TagClass::Universal, 16) {
            return Err(malformed("LDAPMessage is not a SEQUENCE"));
        }
        let mut parts = children(tag)
            .ok_or_else(|| malformed("LDAPMessage is not constructed"))?
            .into_iter();

        let id = parts
            .next()
            .and_then(primitive)
            .map(|b| decode_integer(&b))
            .ok_or_else(|| malformed("missing messageID"))?;
        let op = parts
            .next()
            .ok_or_else(|| malformed("missing protocolOp"))?;

        Ok(Self {
            id: id as MessageId,
            op,
        })
    }

    /// The [APPLICATION n] number of the protocol operation
    pub fn op_id(&self) -> Option<u64> {
        matches!(self.op.class, TagClass::Application).then_some(self.op.id)
    }
}

/// Codec for `LDAPMessage` frames
#[derive(Debug, Default)]
pub struct LdapCodec;

impl Decoder for LdapCodec {
    type Item = LdapMessage;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<LdapMessage>> {
        let len = match frame_length(buf)? {
            Some(len) => len,
            None => return Ok(None),
        };
        if buf.len() < len {
            buf.reserve(len - buf.len());
            return Ok(None);
        }

        let frame = buf.split_to(len);
        let tag = match parse_tag(&frame) {
            Ok((_, tag)) => tag,
            Err(_) => return Err(malformed("undecodable BER element")),
        };
        LdapMessage::from_tag(tag).map(Some)
    }
}

impl Encoder<(MessageId, Tag)> for LdapCodec {
    type Error = io::Error;

    fn encode(&mut self, (id, op): (MessageId, Tag), dst: &mut BytesMut) -> io::Result<()> {
        let message = Tag::Sequence(Sequence {
            inner: vec![
                Tag::Integer(Integer {
                    inner: id as i64,
                    ..Default::default()
                }),
                op,
            ],
            ..Default::default()
        })
        .into_structure();
        write::encode_into(dst, message)
    }
}

/// Total size of the BER element at the head of `buf`, once the header is complete.
fn frame_length(buf: &[u8]) -> io::Result<Option<usize>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    if buf[0] != 0x30 {
        return Err(malformed("LDAPMessage is not a SEQUENCE"));
    }

    let first = buf[1];
    let (header, content) = if first & 0x80 == 0 {
        (2, first as usize)
    } else {
        let n = (first & 0x7f) as usize;
        if n == 0 || n > 4 {
            return Err(malformed("unsupported BER length encoding"));
        }
        if buf.len() < 2 + n {
            return Ok(None);
        }
        let len = buf[2..2 + n]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        (2 + n, len)
    };

    if content > MAX_MESSAGE_SIZE {
        return Err(malformed("message exceeds the size limit"));
    }
    Ok(Some(header + content))
}

// ============================================================================
// Requests
// ============================================================================

/// BindRequest with SASL credentials; the name is empty, the principal
/// travels inside the mechanism exchange.
pub fn sasl_bind_request(mechanism: &str, credentials: Option<&[u8]>) -> Tag {
    let mut sasl = vec![octet_string(mechanism.as_bytes())];
    if let Some(credentials) = credentials {
        sasl.push(octet_string(credentials));
    }

    Tag::Sequence(Sequence {
        id: op::BIND_REQUEST,
        class: TagClass::Application,
        inner: vec![
            Tag::Integer(Integer {
                inner: 3,
                ..Default::default()
            }),
            octet_string(b""),
            Tag::Sequence(Sequence {
                id: 3,
                class: TagClass::Context,
                inner: sasl,
            }),
        ],
    })
}

pub fn search_request(
    base: &str,
    scope: Scope,
    filter: &str,
    attrs: &[&str],
) -> Result<Tag, DirectoryError> {
    let filter_tag =
        ldap3::parse_filter(filter).map_err(|_| DirectoryError::Filter(filter.to_string()))?;

    Ok(Tag::Sequence(Sequence {
        id: op::SEARCH_REQUEST,
        class: TagClass::Application,
        inner: vec![
            octet_string(base.as_bytes()),
            Tag::Enumerated(Enumerated {
                inner: scope as i64,
                ..Default::default()
            }),
            Tag::Enumerated(Enumerated {
                inner: DEREF_ALWAYS,
                ..Default::default()
            }),
            Tag::Integer(Integer {
                inner: 0,
                ..Default::default()
            }),
            Tag::Integer(Integer {
                inner: 0,
                ..Default::default()
            }),
            Tag::Boolean(Boolean {
                inner: false,
                ..Default::default()
            }),
            filter_tag,
            Tag::Sequence(Sequence {
                inner: attrs.iter().map(|a| octet_string(a.as_bytes())).collect(),
                ..Default::default()
            }),
        ],
    }))
}

pub fn extended_request(exop: Exop) -> Tag {
    let mut inner = vec![Tag::OctetString(OctetString {
        id: 0,
        class: TagClass::Context,
        inner: exop.name.unwrap_or_default().into_bytes(),
    })];
    if let Some(val) = exop.val {
        inner.push(Tag::OctetString(OctetString {
            id: 1,
            class: TagClass::Context,
            inner: val,
        }));
    }

    Tag::Sequence(Sequence {
        id: op::EXTENDED_REQUEST,
        class: TagClass::Application,
        inner,
    })
}

pub fn unbind_request() -> Tag {
    Tag::Null(Null {
        id: op::UNBIND_REQUEST,
        class: TagClass::Application,
        inner: (),
    })
}

fn octet_string(value: &[u8]) -> Tag {
    Tag::OctetString(OctetString {
        inner: value.to_vec(),
        ..Default::default()
    })
}

// ============================================================================
// Responses
// ============================================================================

/// `LDAPResult` plus the optional trailers of BindResponse and ExtendedResponse
#[derive(Debug, Clone, Default)]
pub struct OpResult {
    pub code: u32,
    pub matched_dn: String,
    pub message: String,
    pub referrals: Vec<String>,
    pub sasl_creds: Option<Vec<u8>>,
    pub response_name: Option<String>,
    pub response_value: Option<Vec<u8>>,
}

impl OpResult {
    pub fn parse(op: StructureTag) -> io::Result<Self> {
        let mut parts = children(op)
            .ok_or_else(|| malformed("LDAPResult is not constructed"))?
            .into_iter();

        let code = parts
            .next()
            .and_then(primitive)
            .map(|b| decode_integer(&b))
            .ok_or_else(|| malformed("missing resultCode"))?;
        let matched_dn = parts.next().and_then(primitive).map(lossy).unwrap_or_default();
        let message = parts.next().and_then(primitive).map(lossy).unwrap_or_default();

        let mut result = OpResult {
            code: code as u32,
            matched_dn,
            message,
            ..Default::default()
        };

        for part in parts {
            if !matches!(part.class, TagClass::Context) {
                continue;
            }
            match part.id {
                3 => {
                    result.referrals = children(part)
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(primitive)
                        .map(lossy)
                        .collect()
                }
                7 => result.sasl_creds = primitive(part),
                10 => result.response_name = primitive(part).map(lossy),
                11 => result.response_value = primitive(part),
                _ => {}
            }
        }

        Ok(result)
    }

    pub fn is_success(&self) -> bool {
        self.code == rc::SUCCESS
    }

    pub fn into_error(self) -> DirectoryError {
        let message = if self.referrals.is_empty() {
            self.message
        } else {
            format!("{} (referrals: {})", self.message, self.referrals.join(" "))
        };
        DirectoryError::Operation {
            code: self.code,
            message,
        }
    }
}

/// SearchResultEntry into an `ldap3` entry; non-UTF-8 values land in `bin_attrs`.
pub fn parse_search_entry(op: StructureTag) -> io::Result<SearchEntry> {
    let mut parts = children(op)
        .ok_or_else(|| malformed("SearchResultEntry is not constructed"))?
        .into_iter();

    let dn = parts
        .next()
        .and_then(primitive)
        .map(lossy)
        .ok_or_else(|| malformed("missing objectName"))?;

    let mut attrs: HashMap<String, Vec<String>> = HashMap::new();
    let mut bin_attrs: HashMap<String, Vec<Vec<u8>>> = HashMap::new();

    for attr in parts.next().and_then(children).unwrap_or_default() {
        let mut attr_parts = children(attr)
            .ok_or_else(|| malformed("PartialAttribute is not constructed"))?
            .into_iter();
        let name = attr_parts
            .next()
            .and_then(primitive)
            .map(lossy)
            .ok_or_else(|| malformed("missing attribute type"))?;

        for value in attr_parts
            .next()
            .and_then(children)
            .unwrap_or_default()
            .into_iter()
            .filter_map(primitive)
        {
            match String::from_utf8(value) {
                Ok(text) => attrs.entry(name.clone()).or_default().push(text),
                Err(e) => bin_attrs.entry(name.clone()).or_default().push(e.into_bytes()),
            }
        }
    }

    Ok(SearchEntry {
        dn,
        attrs,
        bin_attrs,
    })
}

// ============================================================================
// Helpers
// ============================================================================

fn is(tag: &StructureTag, class: TagClass, id: u64) -> bool {
    std::mem::discriminant(&tag.class) == std::mem::discriminant(&class) && tag.id == id
}

fn children(tag: StructureTag) -> Option<Vec<StructureTag>> {
    match tag.payload {
        PL::C(inner) => Some(inner),
        PL::P(_) => None,
    }
}

fn primitive(tag: StructureTag) -> Option<Vec<u8>> {
    match tag.payload {
        PL::P(bytes) => Some(bytes),
        PL::C(_) => None,
    }
}

fn lossy(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Two's complement, big-endian
fn decode_integer(bytes: &[u8]) -> i64 {
    let init = if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        -1
    } else {
        0
    };
    bytes.iter().fold(init, |acc, b| (acc << 8) | *b as i64)
}

fn malformed(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("malformed LDAP message: {}", what))
}

/// Server-side pieces for exercising the client against an in-process peer
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn result_tag(op_id: u64, code: u32, message: &str, mut trailers: Vec<Tag>) -> Tag {
        let mut inner = vec![
            Tag::Enumerated(Enumerated {
                inner: code as i64,
                ..Default::default()
            }),
            octet_string(b""),
            octet_string(message.as_bytes()),
        ];
        inner.append(&mut trailers);
        Tag::Sequence(Sequence {
            id: op_id,
            class: TagClass::Application,
            inner,
        })
    }

    pub fn bind_response(code: u32, sasl_creds: Option<&[u8]>) -> Tag {
        let trailers = sasl_creds
            .map(|creds| {
                vec![Tag::OctetString(OctetString {
                    id: 7,
                    class: TagClass::Context,
                    inner: creds.to_vec(),
                })]
            })
            .unwrap_or_default();
        result_tag(op::BIND_RESPONSE, code, "", trailers)
    }

    pub fn search_done(code: u32) -> Tag {
        result_tag(op::SEARCH_RESULT_DONE, code, "", Vec::new())
    }

    pub fn extended_response(code: u32, value: Option<&[u8]>) -> Tag {
        let trailers = value
            .map(|v| {
                vec![Tag::OctetString(OctetString {
                    id: 11,
                    class: TagClass::Context,
                    inner: v.to_vec(),
                })]
            })
            .unwrap_or_default();
        result_tag(op::EXTENDED_RESPONSE, code, "", trailers)
    }

    pub fn search_entry(dn: &str, attrs: &[(&str, &[&str])]) -> Tag {
        Tag::Sequence(Sequence {
            id: op::SEARCH_RESULT_ENTRY,
            class: TagClass::Application,
            inner: vec![
                octet_string(dn.as_bytes()),
                Tag::Sequence(Sequence {
                    inner: attrs
                        .iter()
                        .map(|(name, values)| {
                            Tag::Sequence(Sequence {
                                inner: vec![
                                    octet_string(name.as_bytes()),
                                    Tag::Set(ldap3::asn1::Set {
                                        inner: values
                                            .iter()
                                            .map(|v| octet_string(v.as_bytes()))
                                            .collect(),
                                        ..Default::default()
                                    }),
                                ],
                                ..Default::default()
                            })
                        })
                        .collect(),
                    ..Default::default()
                }),
            ],
        })
    }

    /// (mechanism, credentials) of a SASL BindRequest
    pub fn parse_sasl_bind(op: StructureTag) -> (String, Option<Vec<u8>>) {
        let parts = children(op).expect("bind request");
        let sasl = children(parts.into_iter().nth(2).expect("authentication"))
            .expect("sasl credentials");
        let mut sasl = sasl.into_iter();
        let mechanism = lossy(primitive(sasl.next().expect("mechanism")).expect("mechanism"));
        let credentials = sasl.next().and_then(primitive);
        (mechanism, credentials)
    }

    /// (base, scope) of a SearchRequest
    pub fn parse_search(op: StructureTag) -> (String, i64) {
        let mut parts = children(op).expect("search request").into_iter();
        let base = lossy(primitive(parts.next().expect("base")).expect("base"));
        let scope = decode_integer(&primitive(parts.next().expect("scope")).expect("scope"));
        (base, scope)
    }

    pub fn parse_extended_name(op: StructureTag) -> String {
        let mut parts = children(op).expect("extended request").into_iter();
        lossy(primitive(parts.next().expect("requestName")).expect("requestName"))
    }
}
