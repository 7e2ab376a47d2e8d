//! Directory authentication for ldap-sasl
//!
//! SASL binds against LDAP servers, followed by best-effort resolution of
//! the user's DN and group authorities.

pub mod error;
mod hash;
pub mod ldap;

pub use error::{BindError, DirectoryError, SearchError};
pub use ldap::{
    AuthzIdType, BindRequest, DirectoryConnector, DirectorySession, GroupResolver,
    LdapConnector, LdapSaslAuthenticator, UserDnResolver, WhoAmIResult, SUPPORTED_MECHANISMS,
};

/// SASL mechanisms this client implements
pub fn supported_mechanisms() -> &'static [&'static str] {
    SUPPORTED_MECHANISMS
}
