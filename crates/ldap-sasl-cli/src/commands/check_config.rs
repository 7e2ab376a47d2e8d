//! check-config command - validate a realm configuration without connecting

use super::{CommandContext, EXIT_FAILURE};
use anyhow::Result;
use colored::Colorize;
use ldap_sasl_auth::ldap::is_supported;
use ldap_sasl_core::validate::{check_ldap_uri, check_mechanisms, check_search_base, Validation};
use ldap_sasl_core::{GroupResolverConfig, UserDnResolverConfig};
use serde::Serialize;
use std::process::ExitCode;

#[derive(Serialize)]
struct Check {
    field: String,
    value: String,
    #[serde(flatten)]
    result: Validation,
}

pub fn execute(ctx: &CommandContext) -> Result<ExitCode> {
    let checks = run_checks(ctx);
    let failed = checks.iter().any(|c| c.result.is_error());

    if ctx.is_json() {
        ctx.print_json(&checks)?;
    } else {
        for check in &checks {
            let status = match &check.result {
                Validation::Ok => "ok".green().to_string(),
                Validation::Warning(msg) => format!("{} {}", "warning:".yellow(), msg),
                Validation::Error(msg) => format!("{} {}", "error:".red(), msg),
            };
            println!("{:<18} {:<48} {}", check.field.cyan(), check.value, status);
        }
    }

    Ok(if failed {
        ExitCode::from(EXIT_FAILURE)
    } else {
        ExitCode::SUCCESS
    })
}

fn run_checks(ctx: &CommandContext) -> Vec<Check> {
    let config = &ctx.config;
    let mut checks = Vec::new();

    if config.servers.is_empty() {
        checks.push(Check {
            field: "servers".into(),
            value: String::new(),
            result: Validation::Error("LDAP URI is not specified".into()),
        });
    }
    for server in &config.servers {
        checks.push(Check {
            field: "servers".into(),
            value: server.clone(),
            result: check_ldap_uri(server),
        });
    }

    let mechanisms = config.mechanisms.joined();
    let mut mechanism_check = check_mechanisms(&mechanisms);
    if !mechanism_check.is_error() && !config.mechanisms.as_slice().iter().any(|m| is_supported(m)) {
        mechanism_check = Validation::Error(format!(
            "None of the configured mechanisms is supported: {}",
            mechanisms
        ));
    }
    checks.push(Check {
        field: "mechanisms".into(),
        value: mechanisms,
        result: mechanism_check,
    });

    if let Some(UserDnResolverConfig::Search {
        search_base,
        search_query_template,
    }) = &config.user_dn_resolver
    {
        checks.push(Check {
            field: "user search base".into(),
            value: search_base.clone(),
            result: check_search_base(search_base),
        });
        let template = if search_query_template.trim().is_empty() {
            Validation::Warning("No query template, user DN search is disabled".into())
        } else {
            Validation::Ok
        };
        checks.push(Check {
            field: "user search query".into(),
            value: search_query_template.clone(),
            result: template,
        });
    }

    if let Some(GroupResolverConfig::Search { search_base, .. }) = &config.group_resolver {
        checks.push(Check {
            field: "group search base".into(),
            value: search_base.clone(),
            result: check_search_base(search_base),
        });
    }

    checks
}
