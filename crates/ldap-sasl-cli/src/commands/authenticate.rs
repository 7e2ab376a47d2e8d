//! authenticate command - bind as a user and print the resolved identity

use super::CommandContext;
use anyhow::{Context, Result};
use ldap_sasl_auth::LdapSaslAuthenticator;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

pub async fn execute(ctx: &CommandContext, username: &str, password: Option<String>) -> Result<ExitCode> {
    let password = match password {
        Some(password) => password,
        None => read_password(username)?,
    };

    let authenticator = match LdapSaslAuthenticator::new(ctx.config.clone()) {
        Ok(authenticator) => authenticator,
        Err(e) => return ctx.fail(&e),
    };

    match authenticator.authenticate(username, &password).await {
        Ok(user) => {
            ctx.print_user(&user)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => ctx.fail(&e),
    }
}

fn read_password(username: &str) -> Result<String> {
    eprint!("Password for {}: ", username);
    io::stderr().flush().ok();

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from standard input")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
