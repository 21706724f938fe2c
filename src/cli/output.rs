//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::outcome::{Outcome, OutcomeKind};
use crate::reconciler::VariableSet;
use crate::registry::ProvisionerLock;
use crate::step::PlanReport;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Step row for table display.
#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Step")]
    name: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Key/value row for table display.
#[derive(Tabled)]
struct ValueRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the report of a plan run.
    #[must_use]
    pub fn format_report(&self, report: &PlanReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &PlanReport) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "\nPlan: {}\n", report.plan.bold());

        let rows: Vec<StepRow> = report
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| StepRow {
                index: i + 1,
                name: step.name.clone(),
                result: Self::format_kind(step.outcome.kind()),
                message: Self::truncate(step.outcome.message().unwrap_or(""), 60),
            })
            .collect();

        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let _ = write!(output, "\n{}", Self::format_outcome_text(&report.outcome));
        output
    }

    /// Formats a single outcome.
    #[must_use]
    pub fn format_outcome(&self, outcome: &Outcome) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(outcome).unwrap_or_default(),
            OutputFormat::Text => Self::format_outcome_text(outcome),
        }
    }

    fn format_outcome_text(outcome: &Outcome) -> String {
        let marker = match outcome.kind() {
            OutcomeKind::Completed => "✓".green(),
            OutcomeKind::Skipped => "-".dimmed(),
            OutcomeKind::Failed => "✗".red(),
        };
        match outcome.message() {
            Some(message) => format!("{marker} {}: {message}\n", Self::format_kind(outcome.kind())),
            None => format!("{marker} {}\n", Self::format_kind(outcome.kind())),
        }
    }

    /// Formats plan outputs or variables.
    #[must_use]
    pub fn format_values(&self, title: &str, values: &BTreeMap<String, Value>) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(values).unwrap_or_default(),
            OutputFormat::Text => {
                if values.is_empty() {
                    return format!("{title}: none\n");
                }
                let rows: Vec<ValueRow> = values
                    .iter()
                    .map(|(name, value)| ValueRow {
                        name: name.clone(),
                        value: match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        },
                    })
                    .collect();
                format!("\n{title}\n{}\n", Table::new(rows))
            }
        }
    }

    /// Formats persisted variables.
    #[must_use]
    pub fn format_variables(&self, key: &str, variables: &VariableSet) -> String {
        let values: BTreeMap<String, Value> = variables.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        self.format_values(&format!("Variables under {key}"), &values)
    }

    /// Formats a list of resource addresses.
    #[must_use]
    pub fn format_resources(&self, plan: &str, resources: &[String]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(resources).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("\n{} resource(s) in plan {plan}\n", resources.len());
                for resource in resources {
                    let _ = writeln!(output, "   {resource}");
                }
                output
            }
        }
    }

    /// Formats a provisioner lock.
    #[must_use]
    pub fn format_lock(&self, plan: &str, lock: Option<&ProvisionerLock>, age_secs: Option<i64>) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "plan": plan,
                "lock": lock,
                "age_secs": age_secs,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => match lock {
                None => format!("{} Plan {plan} is not locked\n", "✓".green()),
                Some(lock) => {
                    let mut output = format!("{} Plan {plan} is locked\n", "⚠".yellow());
                    let _ = writeln!(output, "   ID: {}", lock.id);
                    let _ = writeln!(output, "   Operation: {}", lock.operation);
                    let _ = writeln!(output, "   Who: {}", lock.who);
                    let _ = writeln!(output, "   Created: {}", lock.created);
                    if let Some(age) = age_secs {
                        let _ = writeln!(output, "   Age: {age}s");
                    }
                    output
                }
            },
        }
    }

    /// Formats a configuration validation report.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result
                    .errors
                    .iter()
                    .map(|e| serde_json::json!({"field": e.field, "message": e.message}))
                    .collect::<Vec<_>>(),
                "warnings": result.warnings,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Configuration is valid\n", "✓".green())
                } else {
                    format!("{} Configuration is invalid\n", "✗".red())
                };
                for error in &result.errors {
                    let _ = writeln!(output, "   - {}: {}", error.field, error.message);
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats an outcome kind with color.
    fn format_kind(kind: OutcomeKind) -> String {
        match kind {
            OutcomeKind::Completed => "completed".green().to_string(),
            OutcomeKind::Skipped => "skipped".dimmed().to_string(),
            OutcomeKind::Failed => "failed".red().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        let first_line = s.lines().next().unwrap_or("");
        if first_line.chars().count() <= max_len {
            first_line.to_string()
        } else {
            let kept: String = first_line.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}
