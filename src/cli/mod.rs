//! # Command Line Interface
//!
//! Operator tooling over [`SecretManager`]: read, write, list, rotate and
//! delete secrets, probe the primary backend and check a configuration file.

pub mod output;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use crate::config::{ConfigLoader, LoggingSettings, SecretsConfig};
use crate::observability::init_logging;
use crate::secrets::{FileCipher, SecretManager, SecretMetadata};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "secret-broker")]
#[command(about = "Provider-agnostic secret management tooling")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (json, yaml or toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print a secret value
    Get {
        key: String,
    },

    /// Store a secret in the primary provider
    Set {
        key: String,

        /// Value to store; read from stdin when omitted
        #[arg(long)]
        value: Option<String>,

        /// Metadata entries as name=value
        #[arg(long = "meta", value_parser = parse_metadata_entry)]
        metadata: Vec<(String, String)>,
    },

    /// Delete a secret from the primary provider
    Delete {
        key: String,
    },

    /// List keys in the primary provider
    List {
        /// Only keys starting with this prefix
        #[arg(default_value = "")]
        prefix: String,

        /// Output format: text, json or yaml
        #[arg(short, long, default_value = "text")]
        output: String,
    },

    /// Replace a secret with a freshly generated value and print it
    Rotate {
        key: String,
    },

    /// Check the primary provider; exits non-zero when unhealthy
    Health,

    /// Load and validate the configuration
    ValidateConfig {
        /// Print the effective configuration (secrets redacted)
        #[arg(long)]
        show: bool,
    },

    /// Generate a base64 key for encrypted secret files
    GenerateKey,
}

/// Result of a command that completed without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// `health` found the primary provider unhealthy
    Unhealthy,
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => ExitCode::SUCCESS,
            Outcome::Unhealthy => ExitCode::FAILURE,
        }
    }
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<Outcome> {
    let cli = Cli::parse();

    if let Commands::GenerateKey = cli.command {
        println!("{}", FileCipher::generate_key()?);
        return Ok(Outcome::Success);
    }

    let config = load_config(cli.config.as_ref())?;
    initialise_logging(&config.logging, cli.verbose, cli.json_logs);

    if let Commands::ValidateConfig { show } = cli.command {
        config.validate().context("Configuration is invalid")?;
        println!("Configuration is valid (provider: {}, fallbacks: {:?})", config.provider, config.fallbacks);
        if show {
            output::print_yaml(&config)?;
        }
        return Ok(Outcome::Success);
    }

    let manager = SecretManager::from_config(&config).await.context("Failed to initialize secret manager")?;
    let result = handle_command(cli.command, &manager).await;

    if let Err(e) = manager.close().await {
        tracing::warn!(error = %e, "Failed to close secret providers");
    }
    result
}

async fn handle_command(command: Commands, manager: &SecretManager) -> anyhow::Result<Outcome> {
    match command {
        Commands::Get { key } => {
            let value = manager.get_secret(&key).await?;
            println!("{}", value.expose_secret());
        }
        Commands::Set { key, value, metadata } => {
            let value = match value {
                Some(value) => value,
                None => read_stdin_value()?,
            };
            let metadata: SecretMetadata = metadata.into_iter().collect();
            manager.set_secret(&key, &value, &metadata).await?;
            println!("Stored '{}' in {}", key, manager.primary().name());
        }
        Commands::Delete { key } => {
            manager.delete_secret(&key).await?;
            println!("Deleted '{}' from {}", key, manager.primary().name());
        }
        Commands::List { prefix, output } => {
            let keys = manager.list_secrets(&prefix).await?;
            match OutputFormat::parse(&output)? {
                OutputFormat::Text => keys.iter().for_each(|key| println!("{}", key)),
                OutputFormat::Json => output::print_json(&keys)?,
                OutputFormat::Yaml => output::print_yaml(&keys)?,
            }
        }
        Commands::Rotate { key } => {
            let value = manager.rotate_secret(&key).await?;
            println!("{}", value.expose_secret());
        }
        Commands::Health => match manager.health_check().await {
            Ok(()) => println!("✅ {} is healthy", manager.primary().name()),
            Err(e) => {
                println!("❌ {} is unhealthy: {}", manager.primary().name(), e);
                return Ok(Outcome::Unhealthy);
            }
        },
        Commands::ValidateConfig { .. } | Commands::GenerateKey => {
            bail!("command does not operate on secrets")
        }
    }

    Ok(Outcome::Success)
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SecretsConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = path {
        loader = loader.with_file(path);
    }
    loader.load().context("Failed to load configuration")
}

fn initialise_logging(settings: &LoggingSettings, verbose: bool, json_logs: bool) {
    let settings = LoggingSettings {
        level: if verbose { "debug".to_string() } else { settings.level.clone() },
        json: settings.json || json_logs,
    };

    if !init_logging(&settings) {
        // Subscriber already set elsewhere (e.g. integration tests); ignore.
    }
}

fn read_stdin_value() -> anyhow::Result<String> {
    let mut value = String::new();
    std::io::stdin().read_to_string(&mut value).context("Failed to read value from stdin")?;
    let value = value.trim_end_matches(['\r', '\n']).to_string();
    if value.is_empty() {
        bail!("No value given: pass --value or pipe the value on stdin");
    }
    Ok(value)
}

fn parse_metadata_entry(entry: &str) -> Result<(String, String), String> {
    match entry.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{}'", entry)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MockProvider;
    use clap::CommandFactory;
    use std::sync::Arc;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_set_with_metadata() {
        let cli = Cli::try_parse_from([
            "secret-broker",
            "--config",
            "secrets.yaml",
            "set",
            "db_password",
            "--value",
            "pw",
            "--meta",
            "owner=payments",
            "--meta",
            "description=primary db",
        ])
        .unwrap();

        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("secrets.yaml")));
        match cli.command {
            Commands::Set { key, value, metadata } => {
                assert_eq!(key, "db_password");
                assert_eq!(value.as_deref(), Some("pw"));
                assert_eq!(
                    metadata,
                    vec![
                        ("owner".to_string(), "payments".to_string()),
                        ("description".to_string(), "primary db".to_string()),
                    ]
                );
            }
            _ => panic!("expected set"),
        }
    }

    #[test]
    fn test_metadata_entry_requires_name() {
        assert!(parse_metadata_entry("=x").is_err());
        assert!(parse_metadata_entry("novalue").is_err());
        assert_eq!(parse_metadata_entry("a=b=c").unwrap(), ("a".to_string(), "b=c".to_string()));
    }

    #[tokio::test]
    async fn test_unhealthy_primary_reports_outcome_without_exiting() {
        let primary = Arc::new(MockProvider::new());
        primary.set_healthy(false);
        let manager = SecretManager::new(primary.clone(), vec![], None);

        let outcome = handle_command(Commands::Health, &manager).await.unwrap();
        assert_eq!(outcome, Outcome::Unhealthy);
        assert!(!primary.is_closed());

        primary.set_healthy(true);
        assert_eq!(handle_command(Commands::Health, &manager).await.unwrap(), Outcome::Success);
    }

    #[tokio::test]
    async fn test_set_then_get_through_handler() {
        let primary = Arc::new(MockProvider::new());
        let manager = SecretManager::new(primary.clone(), vec![], None);

        let set = Commands::Set {
            key: "api_key".to_string(),
            value: Some("k-1".to_string()),
            metadata: vec![("owner".to_string(), "billing".to_string())],
        };
        assert_eq!(handle_command(set, &manager).await.unwrap(), Outcome::Success);
        assert_eq!(primary.metadata("api_key").unwrap()["owner"], "billing");
        assert!(handle_command(Commands::GenerateKey, &manager).await.is_err());
    }

    #[test]
    fn test_list_defaults() {
        let cli = Cli::try_parse_from(["secret-broker", "list"]).unwrap();
        match cli.command {
            Commands::List { prefix, output } => {
                assert_eq!(prefix, "");
                assert_eq!(output, "text");
            }
            _ => panic!("expected list"),
        }
    }
}
