//! Configuration module for the convergence engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `converge.yaml` and the deployment manifest
//! - Validation of configuration values
//! - Content fingerprints for change detection

mod hash;
mod manifest;
mod parser;
mod spec;
mod tfvars;
mod validator;

pub use hash::ConfigHasher;
pub use manifest::{ComponentManifest, Extension, Manifest, Software, SoftwareSection};
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use spec::{
    DatabaseUpgradeConfig, EngineConfig, OrchestratorConfig, PlanConfig, ProvisionerConfig,
    RegistryBackend, RegistryConfig, RetryConfig, UpgradeConfig,
};
pub use tfvars::{TfvarBinding, TfvarMap};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
