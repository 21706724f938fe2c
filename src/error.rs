//! Error types for the convergence engine.
//!
//! This module provides the error hierarchy for every layer of a run:
//! configuration, the cluster registry, the provisioner, the application
//! orchestrator, and resumable upgrade procedures.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the convergence engine.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cluster registry errors.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Provisioner errors.
    #[error("Provisioner error: {0}")]
    Provisioner(#[from] ProvisionerError),

    /// Application orchestrator errors.
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// Resumable upgrade errors.
    #[error("{0}")]
    Upgrade(#[from] UpgradeError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A plan referenced by name is not declared.
    #[error("Unknown plan: {name}")]
    UnknownPlan {
        /// Name of the plan.
        name: String,
    },

    /// An override could not be parsed.
    #[error("Invalid override '{raw}': {message}")]
    InvalidOverride {
        /// The raw `key=value` text.
        raw: String,
        /// Why it was rejected.
        message: String,
    },
}

/// Cluster registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry could not be reached or answered unexpectedly.
    #[error("Registry transport failure: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// The key does not exist.
    #[error("Registry key not found: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// A stored value could not be decoded.
    #[error("Registry value for '{key}' is corrupted: {message}")]
    Corrupted {
        /// The key holding the value.
        key: String,
        /// Description of the decoding failure.
        message: String,
    },

    /// A value could not be encoded.
    #[error("Registry serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },

    /// The key cannot be stored by this backend.
    #[error("Invalid registry key: '{key}'")]
    InvalidKey {
        /// The rejected key.
        key: String,
    },

    /// The backend does not support the requested operation.
    #[error("Operation '{operation}' is not supported by the {backend} registry")]
    Unsupported {
        /// Operation name.
        operation: String,
        /// Backend type.
        backend: String,
    },
}

/// Provisioner errors.
#[derive(Debug, Error)]
pub enum ProvisionerError {
    /// The remote state of the plan is locked by another operation.
    #[error("Remote state of plan '{plan}' is locked")]
    StateLocked {
        /// Plan name.
        plan: String,
        /// Captured stderr.
        stderr: String,
    },

    /// The provisioner exited with a failure.
    #[error("'{command}' failed for plan '{plan}': {stderr}")]
    CommandFailed {
        /// Plan name.
        plan: String,
        /// Provisioner sub-command.
        command: String,
        /// Captured stderr.
        stderr: String,
    },

    /// The provisioner did not finish in time.
    #[error("'{command}' for plan '{plan}' timed out after {timeout_secs}s")]
    Timeout {
        /// Plan name.
        plan: String,
        /// Provisioner sub-command.
        command: String,
        /// Timeout that expired.
        timeout_secs: u64,
    },

    /// The provisioner binary could not be started.
    #[error("Failed to launch provisioner: {message}")]
    Launch {
        /// Description of the failure.
        message: String,
    },

    /// Output could not be decoded.
    #[error("Invalid provisioner output: {message}")]
    InvalidOutput {
        /// Description of the decoding failure.
        message: String,
    },
}

/// Application orchestrator errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Application not deployed in the model.
    #[error("Application '{application}' not found in model '{model}'")]
    ApplicationNotFound {
        /// Application name.
        application: String,
        /// Model name.
        model: String,
    },

    /// No unit of the application is leader.
    #[error("No leader unit found for '{application}' in model '{model}'")]
    LeaderNotFound {
        /// Application name.
        application: String,
        /// Model name.
        model: String,
    },

    /// An action completed with a failure.
    #[error("Action '{action}' on {unit} failed: {message}")]
    ActionFailed {
        /// Unit the action ran on.
        unit: String,
        /// Action name.
        action: String,
        /// Failure details.
        message: String,
    },

    /// A wait for status expired.
    #[error("Timed out waiting for {target} to reach {expected}; last observed: {last_observed}")]
    Timeout {
        /// Application or unit being waited on.
        target: String,
        /// Description of the awaited condition.
        expected: String,
        /// Last status seen before expiry.
        last_observed: String,
    },

    /// The orchestrator command failed.
    #[error("'{command}' failed: {stderr}")]
    CommandFailed {
        /// Orchestrator sub-command.
        command: String,
        /// Captured stderr.
        stderr: String,
    },

    /// The orchestrator binary could not be started.
    #[error("Failed to launch orchestrator: {message}")]
    Launch {
        /// Description of the failure.
        message: String,
    },

    /// Response could not be decoded.
    #[error("Invalid orchestrator response: {message}")]
    InvalidResponse {
        /// Description of the decoding failure.
        message: String,
    },
}

/// A failed phase of a resumable procedure.
///
/// The display text always ends with the remediation an operator should
/// follow.
#[derive(Debug, Error)]
#[error("{phase}: {reason}\n{remediation}")]
pub struct UpgradeError {
    /// Phase that failed.
    pub phase: String,
    /// What went wrong.
    pub reason: String,
    /// What the operator should do next.
    pub remediation: String,
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;

impl ConvergeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the provisioner reported a locked remote state.
    #[must_use]
    pub const fn is_state_locked(&self) -> bool {
        matches!(
            self,
            Self::Provisioner(ProvisionerError::StateLocked { .. })
        )
    }

    /// Returns true if a registry key or orchestrator application was missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Registry(RegistryError::NotFound { .. })
                | Self::Orchestrator(OrchestratorError::ApplicationNotFound { .. })
        )
    }

    /// Returns true if a command or status wait ran out of time.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Provisioner(ProvisionerError::Timeout { .. })
                | Self::Orchestrator(OrchestratorError::Timeout { .. })
        )
    }

    /// Returns true if a backend could not be reached at all.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Registry(RegistryError::Transport { .. })
                | Self::Provisioner(ProvisionerError::Launch { .. })
                | Self::Orchestrator(OrchestratorError::Launch { .. })
        )
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl RegistryError {
    /// Creates a transport error with the given message.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a not-found error for the given key.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }
}

impl UpgradeError {
    /// Creates a phase failure with remediation text.
    #[must_use]
    pub fn new(
        phase: impl Into<String>,
        reason: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Self {
        Self {
            phase: phase.into(),
            reason: reason.into(),
            remediation: remediation.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_locked_predicate() {
        let err = ConvergeError::from(ProvisionerError::StateLocked {
            plan: String::from("openstack-plan"),
            stderr: String::from("Error acquiring the state lock"),
        });
        assert!(err.is_state_locked());
        assert!(!err.is_transport());

        let err = ConvergeError::from(ProvisionerError::CommandFailed {
            plan: String::from("openstack-plan"),
            command: String::from("apply"),
            stderr: String::from("boom"),
        });
        assert!(!err.is_state_locked());
    }

    #[test]
    fn test_upgrade_error_display_carries_remediation() {
        let err = UpgradeError::new("SCALED_UP", "scale failed", "Re-run the upgrade to retry.");
        let text = ConvergeError::from(err).to_string();
        assert!(text.starts_with("SCALED_UP: scale failed"));
        assert!(text.ends_with("Re-run the upgrade to retry."));
    }

    #[test]
    fn test_not_found_predicate() {
        assert!(ConvergeError::from(RegistryError::not_found("k")).is_not_found());
        assert!(!ConvergeError::from(RegistryError::transport("down")).is_not_found());
    }
}
