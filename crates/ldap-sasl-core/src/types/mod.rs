//! Core types for ldap-sasl

mod user;

pub use user::*;
