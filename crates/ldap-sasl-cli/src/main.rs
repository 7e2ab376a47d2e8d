//! ldap-sasl - LDAP SASL authentication from the command line
//!
//! Authenticates users against a directory, looks users up with the service
//! account and checks realm configurations.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use commands::CommandContext;
use ldap_sasl_core::{MechanismList, RealmConfig};
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ldap-sasl")]
#[command(version = ldap_sasl_core::VERSION)]
#[command(about = "Authenticate against LDAP directories with SASL", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "LDAP_SASL_CONFIG")]
    config: Option<String>,

    /// LDAP server URI (repeatable, overrides the configuration)
    #[arg(short, long = "server", global = true)]
    servers: Vec<String>,

    /// SASL mechanisms, space or comma separated (overrides the configuration)
    #[arg(short, long, global = true)]
    mechanisms: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LDAP_SASL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate a user and print the resulting identity
    Authenticate {
        #[arg(short, long)]
        username: String,

        /// Password; read from standard input when absent
        #[arg(short, long, env = "LDAP_SASL_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Look a user up with the configured service account
    Lookup { username: String },

    /// Validate server URIs, mechanisms and search bases
    CheckConfig,

    /// List the SASL mechanisms this client implements
    Mechanisms,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level), &config.logging.format);

    let ctx = CommandContext {
        config,
        output_format: cli.output,
    };

    match cli.command {
        Commands::Authenticate { username, password } => {
            commands::authenticate::execute(&ctx, &username, password).await
        }
        Commands::Lookup { username } => commands::lookup::execute(&ctx, &username).await,
        Commands::CheckConfig => commands::check_config::execute(&ctx),
        Commands::Mechanisms => commands::mechanisms::execute(&ctx),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<RealmConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = RealmConfig::from_file(path)?;
            config.apply_env_overrides();
            config
        }
        None => RealmConfig::from_env(),
    };

    if !cli.servers.is_empty() {
        config.servers = cli.servers.clone();
    }
    if let Some(mechanisms) = &cli.mechanisms {
        config.mechanisms = MechanismList::parse(mechanisms);
    }
    config.normalize();

    Ok(config)
}

/// Logs go to stderr; stdout carries command output only.
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_authenticate() {
        let cli = Cli::try_parse_from([
            "ldap-sasl",
            "authenticate",
            "--username",
            "alice",
            "--password",
            "secret",
            "--server",
            "ldap://a.example.com",
            "--server",
            "ldap://b.example.com",
            "-m",
            "DIGEST-MD5,CRAM-MD5",
        ])
        .unwrap();

        assert_eq!(cli.servers.len(), 2);
        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Authenticate { username, password } => {
                assert_eq!(username, "alice");
                assert_eq!(password.as_deref(), Some("secret"));
            }
            _ => panic!("expected authenticate"),
        }
    }

    #[test]
    fn test_flags_override_configuration() {
        let cli = Cli::try_parse_from([
            "ldap-sasl",
            "check-config",
            "--server",
            " ldap://ldap.example.com ",
            "--mechanisms",
            "PLAIN, CRAM-MD5",
            "--output",
            "text",
        ])
        .unwrap();

        let config = load_config(&cli).unwrap();
        assert_eq!(config.servers, vec!["ldap://ldap.example.com"]);
        assert_eq!(config.mechanisms.as_slice(), ["PLAIN", "CRAM-MD5"]);
        assert_eq!(cli.output, OutputFormat::Text);
    }

    #[test]
    fn test_lookup_takes_positional_username() {
        let cli = Cli::try_parse_from(["ldap-sasl", "lookup", "bob"]).unwrap();
        assert!(matches!(cli.command, Commands::Lookup { username } if username == "bob"));
    }
}
