//! LDAP SASL authentication
//!
//! - `protocol`: LDAPv3 message codec
//! - `connection`: TCP/TLS transport, SASL negotiation and bind
//! - `sasl`: client-side SASL mechanisms
//! - `whoami`: RFC 4532 "Who am I?" extended operation
//! - `dn`, `group`: user DN and group authority resolvers
//! - `client`: the authenticator tying them together

mod client;
mod connection;
mod dn;
mod group;
mod protocol;
mod sasl;
mod session;
mod whoami;

#[cfg(test)]
mod fake;

pub use client::LdapSaslAuthenticator;
pub use connection::{LdapConnection, LdapConnector, Transport};
pub use dn::{
    user_dn_resolver, NoUserDnResolver, SearchUserDnResolver, UserDnResolver,
    WhoAmIUserDnResolver,
};
pub use group::{group_resolver, GroupResolver, NoGroupResolver, SearchGroupResolver};
pub use protocol::{LdapCodec, LdapMessage, MessageId, OpResult};
pub use sasl::{is_supported, new_mechanism, SaslMechanism, SUPPORTED_MECHANISMS};
pub use session::{BindRequest, DirectoryConnector, DirectorySession};
pub use whoami::{AuthzIdType, WhoAmIRequest, WhoAmIResult, WHOAMI_OID};
