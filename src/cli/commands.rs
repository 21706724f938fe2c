//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::error::{ConfigError, ConvergeError, Result};
use crate::reconciler::VariableSet;

/// Converge - idempotent provisioner and orchestrator driver.
#[derive(Parser, Debug)]
#[command(name = "converge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "CONVERGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text", env = "CONVERGE_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration and the manifest.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Initialise a plan directory and its remote-state backend.
    Init {
        /// Plan name.
        plan: String,
    },

    /// Reconcile and apply the variables of a plan.
    Deploy {
        /// Plan name.
        plan: String,

        /// Application to wait for, instead of the plan's.
        #[arg(short, long)]
        application: Option<String>,

        /// Variable override as `name=<json>`; plain text is taken as a string.
        #[arg(long = "set", value_name = "NAME=VALUE")]
        overrides: Vec<String>,

        /// Only resolve these manifest components.
        #[arg(long = "component", value_name = "COMPONENT")]
        components: Vec<String>,

        /// Apply even if the variables did not change.
        #[arg(long)]
        refresh: bool,
    },

    /// Destroy every resource of a plan.
    Destroy {
        /// Plan name.
        plan: String,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the outputs of a plan.
    Output {
        /// Plan name.
        plan: String,
    },

    /// Show the variables persisted for a plan.
    Vars {
        /// Plan name.
        plan: String,
    },

    /// Inspect and repair provisioner state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },

    /// Run an upgrade procedure.
    Upgrade {
        /// Upgrade subcommand.
        #[command(subcommand)]
        command: UpgradeCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// List resource addresses.
    List {
        /// Plan name.
        plan: String,
    },

    /// Remove a resource from the state without destroying it.
    Rm {
        /// Plan name.
        plan: String,

        /// Resource address.
        address: String,
    },

    /// Refresh the state from the real resources.
    Sync {
        /// Plan name.
        plan: String,
    },

    /// Print the raw state document.
    Pull {
        /// Plan name.
        plan: String,
    },

    /// Release the remote-state lock of a plan.
    Unlock {
        /// Plan name.
        plan: String,

        /// Only release a lock older than this many seconds.
        #[arg(long, default_value = "0")]
        older_than: i64,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
}

/// Upgrade subcommands.
#[derive(Subcommand, Debug)]
pub enum UpgradeCommands {
    /// Refresh the database to the latest revision of its channel.
    Database {
        /// Discard the progress of an interrupted upgrade first.
        #[arg(long)]
        reset_state: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Parses `--set name=value` arguments.
///
/// Values that are not valid JSON are taken as strings.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidOverride`] if an argument has no `=` or an
/// empty name.
pub fn parse_overrides(raw: &[String]) -> Result<VariableSet> {
    let mut overrides = VariableSet::new();
    for item in raw {
        let Some((name, value)) = item.split_once('=') else {
            return Err(invalid_override(item, "expected NAME=VALUE"));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid_override(item, "empty variable name"));
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        overrides.insert(name.to_string(), value);
    }
    Ok(overrides)
}

fn invalid_override(raw: &str, message: &str) -> ConvergeError {
    ConvergeError::Config(ConfigError::InvalidOverride {
        raw: raw.to_string(),
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_deploy() {
        let cli = Cli::try_parse_from([
            "converge",
            "deploy",
            "openstack-plan",
            "--set",
            r#"keystone-config={"debug":true}"#,
            "--set",
            "keystone-channel=2024.1/stable",
            "--refresh",
        ])
        .expect("parse");

        let Commands::Deploy { plan, overrides, refresh, .. } = cli.command else {
            panic!("expected deploy");
        };
        assert_eq!(plan, "openstack-plan");
        assert!(refresh);

        let parsed = parse_overrides(&overrides).expect("overrides");
        assert_eq!(parsed["keystone-config"], json!({"debug": true}));
        assert_eq!(parsed["keystone-channel"], json!("2024.1/stable"));
    }

    #[test]
    fn test_parse_upgrade_reset() {
        let cli = Cli::try_parse_from(["converge", "upgrade", "database", "--reset-state"]).expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Upgrade {
                command: UpgradeCommands::Database { reset_state: true }
            }
        ));
    }

    #[test]
    fn test_invalid_override() {
        assert!(parse_overrides(&[String::from("no-equals")]).is_err());
        assert!(parse_overrides(&[String::from("=1")]).is_err());
        assert_eq!(parse_overrides(&[String::from("n=1")]).expect("ok")["n"], json!(1));
    }
}
