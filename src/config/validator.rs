//! Configuration validation.
//!
//! Field-level rules come from the `validator` derives on the config types;
//! this module adds the cross-field rules and collects everything into one
//! report.

use crate::error::{ConfigError, ConvergeError, Result};
use std::collections::HashSet;
use tracing::debug;
use ::validator::{Validate, ValidationErrors, ValidationErrorsKind};

use super::spec::{EngineConfig, PlanConfig, RegistryBackend};

/// Validator for engine configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationResult {
    /// Returns true if no errors were found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates an engine configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate(&self, config: &EngineConfig) -> Result<ValidationResult> {
        let result = self.report(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(ConvergeError::Config(ConfigError::validation(
                first_error.message.clone(),
                first_error.field.clone(),
            )))
        }
    }

    /// Builds the full report without failing.
    #[must_use]
    pub fn report(&self, config: &EngineConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        if let Err(errors) = config.validate() {
            collect_field_errors("", &errors, &mut result.errors);
            result.errors.sort_by(|a, b| a.field.cmp(&b.field));
        }

        Self::validate_registry(config, &mut result);
        Self::validate_plans(config, &mut result);
        Self::validate_retry(config, &mut result);

        result
    }

    fn validate_registry(config: &EngineConfig, result: &mut ValidationResult) {
        match config.registry.backend {
            RegistryBackend::Http => {
                if config.registry.address.as_ref().is_none_or(String::is_empty) {
                    result.errors.push(ValidationError {
                        field: String::from("registry.address"),
                        message: String::from("Registry address is required when using the http backend"),
                    });
                }
            }
            RegistryBackend::Local => {
                if config.registry.path.is_none() {
                    result
                        .warnings
                        .push(String::from("registry.path not set, using .converge/registry"));
                }
            }
            RegistryBackend::Memory => {
                result
                    .warnings
                    .push(String::from("Memory registry selected: nothing will be persisted"));
            }
        }
    }

    fn validate_plans(config: &EngineConfig, result: &mut ValidationResult) {
        if config.plans.is_empty() {
            result.warnings.push(String::from("No plans defined in configuration"));
            return;
        }

        let mut seen_names = HashSet::new();
        let mut seen_keys = HashSet::new();

        for (i, plan) in config.plans.iter().enumerate() {
            let prefix = format!("plans[{i}]");

            if !seen_names.insert(plan.name.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!("Duplicate plan name: {}", plan.name),
                });
            }

            if !seen_keys.insert(plan.config_key.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.config_key"),
                    message: format!("Registry key {} is used by more than one plan", plan.config_key),
                });
            }

            if plan.config_key == config.upgrade.database.state_key {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.config_key"),
                    message: format!(
                        "Registry key {} collides with the database upgrade state key",
                        plan.config_key
                    ),
                });
            }

            Self::validate_tfvars(plan, &prefix, result);
        }
    }

    fn validate_tfvars(plan: &PlanConfig, prefix: &str, result: &mut ValidationResult) {
        for variable in plan.tfvars.duplicate_variables() {
            result.errors.push(ValidationError {
                field: format!("{prefix}.tfvars"),
                message: format!("Variable {variable} is bound more than once"),
            });
        }

        let declared: HashSet<&str> = plan.tfvars.bindings(None).map(|b| b.variable).collect();
        for preserved in &plan.tfvars.preserve {
            if !declared.contains(preserved.as_str()) {
                result.warnings.push(format!(
                    "{prefix}.tfvars.preserve: {preserved} is not produced by any binding"
                ));
            }
        }
    }

    fn validate_retry(config: &EngineConfig, result: &mut ValidationResult) {
        if config.retry.deadline_secs < config.retry.interval_secs {
            result.warnings.push(format!(
                "retry.deadline_secs ({}) is shorter than retry.interval_secs ({}): a locked state is never retried",
                config.retry.deadline_secs, config.retry.interval_secs
            ));
        }
    }
}

/// Flattens `validator` errors into dotted field paths.
fn collect_field_errors(prefix: &str, errors: &ValidationErrors, out: &mut Vec<ValidationError>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            format!("{field}")
        } else {
            format!("{prefix}.{field}")
        };

        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                for error in field_errors {
                    let message = error.message.as_ref().map_or_else(
                        || format!("{path} failed the '{}' check", error.code),
                        ToString::to_string,
                    );
                    out.push(ValidationError {
                        field: path.clone(),
                        message,
                    });
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_field_errors(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_field_errors(&format!("{path}[{index}]"), inner, out);
                }
            }
        }
    }
}
