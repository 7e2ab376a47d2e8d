//! ldap-sasl core library
//!
//! Configuration, validation, error taxonomy and result types shared by the
//! authentication core and its front ends.

pub mod config;
pub mod error;
pub mod types;
pub mod validate;

pub use config::{GroupResolverConfig, MechanismList, RealmConfig, UserDnResolverConfig};
pub use error::{Error, Result};
pub use types::{AuthenticatedUser, Authority, Credentials, LookupOutcome};

/// ldap-sasl version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default LDAP port
pub const DEFAULT_LDAP_PORT: u16 = 389;

/// Default LDAPS port
pub const DEFAULT_LDAPS_PORT: u16 = 636;
