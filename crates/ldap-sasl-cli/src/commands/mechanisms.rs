//! mechanisms command - list client-side SASL mechanisms

use super::CommandContext;
use anyhow::Result;
use colored::Colorize;
use ldap_sasl_auth::supported_mechanisms;
use serde::Serialize;
use std::process::ExitCode;

#[derive(Serialize)]
struct MechanismsOutput<'a> {
    supported: &'a [&'static str],
    configured: Vec<ConfiguredMechanism<'a>>,
}

#[derive(Serialize)]
struct ConfiguredMechanism<'a> {
    name: &'a str,
    supported: bool,
}

pub fn execute(ctx: &CommandContext) -> Result<ExitCode> {
    let configured: Vec<ConfiguredMechanism> = ctx
        .config
        .mechanisms
        .as_slice()
        .iter()
        .map(|name| ConfiguredMechanism {
            name,
            supported: ldap_sasl_auth::ldap::is_supported(name),
        })
        .collect();

    if ctx.is_json() {
        ctx.print_json(&MechanismsOutput {
            supported: supported_mechanisms(),
            configured,
        })?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", "Supported".bold());
    for name in supported_mechanisms() {
        println!("  {}", name);
    }
    if !configured.is_empty() {
        println!("{}", "Configured".bold());
        for mechanism in &configured {
            let marker = if mechanism.supported {
                "yes".green()
            } else {
                "no".red()
            };
            println!("  {:<12} {}", mechanism.name, marker);
        }
    }
    Ok(ExitCode::SUCCESS)
}
