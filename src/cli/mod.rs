//! CLI module for the convergence engine.
//!
//! This module provides the command-line interface of the `converge`
//! binary.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, StateCommands, UpgradeCommands, parse_overrides};
pub use output::OutputFormatter;
