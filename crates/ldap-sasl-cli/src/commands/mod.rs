//! CLI command implementations

pub mod authenticate;
pub mod check_config;
pub mod lookup;
pub mod mechanisms;

use crate::OutputFormat;
use anyhow::Result;
use colored::Colorize;
use ldap_sasl_core::{AuthenticatedUser, RealmConfig};
use serde::Serialize;
use std::process::ExitCode;

pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_BAD_CREDENTIALS: u8 = 2;
pub const EXIT_NOT_FOUND: u8 = 3;

/// Context passed to all commands
pub struct CommandContext {
    pub config: RealmConfig,
    pub output_format: OutputFormat,
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    error: &'a str,
    message: String,
}

impl CommandContext {
    /// Check if output should be JSON
    pub fn is_json(&self) -> bool {
        matches!(self.output_format, OutputFormat::Json)
    }

    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    pub fn print_user(&self, user: &AuthenticatedUser) -> Result<()> {
        if self.is_json() {
            return self.print_json(user);
        }

        println!("{}", user.username.green().bold());
        println!(
            "  {}: {}",
            "DN".cyan(),
            user.dn.as_deref().unwrap_or("(unresolved)")
        );
        if user.authorities.is_empty() {
            println!("  {}: none", "Authorities".cyan());
        } else {
            println!("  {}:", "Authorities".cyan());
            for authority in &user.authorities {
                println!("    {}", authority);
            }
        }
        Ok(())
    }

    /// Report a call-level failure and map it to the process exit status
    pub fn fail(&self, err: &ldap_sasl_core::Error) -> Result<ExitCode> {
        if self.is_json() {
            self.print_json(&ErrorOutput {
                error: err.code(),
                message: err.to_string(),
            })?;
        } else {
            eprintln!("{} {}", "error:".red().bold(), err);
        }
        Ok(ExitCode::from(exit_status(err)))
    }
}

pub fn exit_status(err: &ldap_sasl_core::Error) -> u8 {
    if err.is_bad_credentials() {
        EXIT_BAD_CREDENTIALS
    } else {
        EXIT_FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldap_sasl_core::Error;

    #[test]
    fn test_exit_status_separates_credential_failures() {
        assert_eq!(exit_status(&Error::BadCredentials("alice".into())), EXIT_BAD_CREDENTIALS);
        assert_eq!(exit_status(&Error::Service("timeout".into())), EXIT_FAILURE);
        assert_eq!(exit_status(&Error::Configuration("no server".into())), EXIT_FAILURE);
    }
}
