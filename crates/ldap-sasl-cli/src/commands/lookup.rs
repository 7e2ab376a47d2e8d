//! lookup command - find a user with the service account

use super::{CommandContext, EXIT_NOT_FOUND};
use anyhow::Result;
use colored::Colorize;
use ldap_sasl_auth::LdapSaslAuthenticator;
use ldap_sasl_core::LookupOutcome;
use std::process::ExitCode;

pub async fn execute(ctx: &CommandContext, username: &str) -> Result<ExitCode> {
    let authenticator = match LdapSaslAuthenticator::new(ctx.config.clone()) {
        Ok(authenticator) => authenticator,
        Err(e) => return ctx.fail(&e),
    };

    let outcome = match authenticator.lookup(username).await {
        Ok(outcome) => outcome,
        Err(e) => return ctx.fail(&e),
    };

    if ctx.is_json() {
        ctx.print_json(&outcome)?;
    }

    match outcome {
        LookupOutcome::Found(user) => {
            if !ctx.is_json() {
                ctx.print_user(&user)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        LookupOutcome::NotFound => {
            if !ctx.is_json() {
                println!("{} {}", username.yellow(), "not found".dimmed());
            }
            Ok(ExitCode::from(EXIT_NOT_FOUND))
        }
    }
}
