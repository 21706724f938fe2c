//! Engine configuration types.
//!
//! This module defines the structs that map to the `converge.yaml` file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use ::validator::Validate;

use super::tfvars::TfvarMap;

/// The root configuration structure for the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct EngineConfig {
    /// Cluster registry configuration.
    #[serde(default)]
    #[validate(nested)]
    pub registry: RegistryConfig,
    /// Provisioner configuration.
    #[serde(default)]
    #[validate(nested)]
    pub provisioner: ProvisionerConfig,
    /// Lock-contention retry policy.
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryConfig,
    /// Orchestrator configuration.
    #[serde(default)]
    #[validate(nested)]
    pub orchestrator: OrchestratorConfig,
    /// Path to the deployment manifest, relative to the config file.
    #[serde(default)]
    pub manifest: Option<PathBuf>,
    /// Provisioner plans managed by the engine.
    #[serde(default)]
    #[validate(nested)]
    pub plans: Vec<PlanConfig>,
    /// Upgrade procedures.
    #[serde(default)]
    #[validate(nested)]
    pub upgrade: UpgradeConfig,
}

/// Registry backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct RegistryConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: RegistryBackend,
    /// API base address (required for the http backend).
    #[serde(default)]
    #[validate(url)]
    pub address: Option<String>,
    /// Directory for the local backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Accept self-signed registry certificates.
    #[serde(default = "default_true")]
    pub skip_cert_verification: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::default(),
            address: None,
            path: None,
            skip_cert_verification: default_true(),
        }
    }
}

/// Registry backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// Local file-based registry.
    #[default]
    Local,
    /// Cluster daemon reached over HTTP.
    Http,
    /// Process memory, for dry runs.
    Memory,
}

/// Provisioner configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ProvisionerConfig {
    /// Provisioner binary.
    #[serde(default = "default_provisioner_binary")]
    pub binary: PathBuf,
    /// Directory holding one sub-directory per plan.
    #[serde(default = "default_plans_dir")]
    pub plans_dir: PathBuf,
    /// Value passed as `-parallelism`.
    #[serde(default)]
    #[validate(range(min = 1, max = 256))]
    pub parallelism: Option<u32>,
    /// Timeout of a single apply.
    #[serde(default = "default_apply_timeout")]
    #[validate(range(min = 1))]
    pub apply_timeout_secs: u64,
    /// Timeout of every other provisioner command.
    #[serde(default = "default_command_timeout")]
    #[validate(range(min = 1))]
    pub command_timeout_secs: u64,
    /// Default `TF_LOG` level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Extra environment passed to every invocation.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Retry policy for a locked remote state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct RetryConfig {
    /// Fixed delay between attempts.
    #[serde(default = "default_retry_interval")]
    #[validate(range(min = 1))]
    pub interval_secs: u64,
    /// Overall deadline after the first attempt.
    #[serde(default = "default_retry_deadline")]
    #[validate(range(min = 1))]
    pub deadline_secs: u64,
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct OrchestratorConfig {
    /// Orchestrator binary.
    #[serde(default = "default_orchestrator_binary")]
    pub binary: PathBuf,
    /// Model holding the applications.
    #[serde(default = "default_model")]
    #[validate(length(min = 1))]
    pub model: String,
    /// Delay between status polls.
    #[serde(default = "default_poll_interval")]
    #[validate(range(min = 1))]
    pub poll_interval_secs: u64,
    /// Default timeout when waiting for an application.
    #[serde(default = "default_wait_timeout")]
    #[validate(range(min = 1))]
    pub wait_timeout_secs: u64,
    /// Statuses that count as ready after a deploy.
    #[serde(default = "default_accepted_statuses")]
    #[validate(length(min = 1))]
    pub accepted_statuses: Vec<String>,
}

/// A provisioner plan managed by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct PlanConfig {
    /// Plan name, also used in remote-state URLs.
    #[validate(length(min = 1))]
    pub name: String,
    /// Plan directory, relative to `provisioner.plans_dir`.
    pub directory: PathBuf,
    /// Registry key holding the variables last applied.
    #[validate(length(min = 1))]
    pub config_key: String,
    /// Manifest-derived variables.
    #[serde(default)]
    pub tfvars: TfvarMap,
    /// Application deployed by this plan, awaited after apply.
    #[serde(default)]
    pub application: Option<String>,
}

/// Upgrade procedures configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct UpgradeConfig {
    /// Database upgrade procedure.
    #[serde(default)]
    #[validate(nested)]
    pub database: DatabaseUpgradeConfig,
}

/// Database upgrade procedure configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct DatabaseUpgradeConfig {
    /// Application name in the model.
    #[serde(default = "default_db_application")]
    #[validate(length(min = 1))]
    pub application: String,
    /// Component name in the manifest.
    #[serde(default = "default_db_component")]
    #[validate(length(min = 1))]
    pub component: String,
    /// Registry key holding the procedure phase.
    #[serde(default = "default_db_state_key")]
    #[validate(length(min = 1))]
    pub state_key: String,
    /// Timeout for the scaled-up application to settle.
    #[serde(default = "default_scale_timeout")]
    pub scale_timeout_secs: u64,
    /// Timeout for the primary unit to finish its refresh.
    #[serde(default = "default_primary_unit_timeout")]
    pub primary_unit_timeout_secs: u64,
    /// Timeout for every unit to settle after resuming.
    #[serde(default = "default_settle_timeout")]
    pub settle_timeout_secs: u64,
}

impl EngineConfig {
    /// Finds a plan by name.
    #[must_use]
    pub fn plan(&self, name: &str) -> Option<&PlanConfig> {
        self.plans.iter().find(|p| p.name == name)
    }

    /// Resolves the directory of a plan.
    #[must_use]
    pub fn plan_dir(&self, plan: &PlanConfig) -> PathBuf {
        self.provisioner.plans_dir.join(&plan.directory)
    }
}

impl RetryConfig {
    /// Delay between attempts.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Overall deadline.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            binary: default_provisioner_binary(),
            plans_dir: default_plans_dir(),
            parallelism: None,
            apply_timeout_secs: default_apply_timeout(),
            command_timeout_secs: default_command_timeout(),
            log_level: default_log_level(),
            env: BTreeMap::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_retry_interval(),
            deadline_secs: default_retry_deadline(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            binary: default_orchestrator_binary(),
            model: default_model(),
            poll_interval_secs: default_poll_interval(),
            wait_timeout_secs: default_wait_timeout(),
            accepted_statuses: default_accepted_statuses(),
        }
    }
}

impl Default for DatabaseUpgradeConfig {
    fn default() -> Self {
        Self {
            application: default_db_application(),
            component: default_db_component(),
            state_key: default_db_state_key(),
            scale_timeout_secs: default_scale_timeout(),
            primary_unit_timeout_secs: default_primary_unit_timeout(),
            settle_timeout_secs: default_settle_timeout(),
        }
    }
}

// Default value functions for serde

const fn default_true() -> bool {
    true
}

fn default_provisioner_binary() -> PathBuf {
    PathBuf::from("terraform")
}

fn default_plans_dir() -> PathBuf {
    PathBuf::from("plans")
}

const fn default_apply_timeout() -> u64 {
    1200
}

const fn default_command_timeout() -> u64 {
    600
}

fn default_log_level() -> String {
    String::from("INFO")
}

const fn default_retry_interval() -> u64 {
    60
}

const fn default_retry_deadline() -> u64 {
    300
}

fn default_orchestrator_binary() -> PathBuf {
    PathBuf::from("juju")
}

fn default_model() -> String {
    String::from("openstack")
}

const fn default_poll_interval() -> u64 {
    10
}

const fn default_wait_timeout() -> u64 {
    600
}

fn default_accepted_statuses() -> Vec<String> {
    vec![String::from("active"), String::from("unknown")]
}

fn default_db_application() -> String {
    String::from("mysql")
}

fn default_db_component() -> String {
    String::from("mysql-k8s")
}

fn default_db_state_key() -> String {
    String::from("mysql_k8s_upgrade_state")
}

const fn default_scale_timeout() -> u64 {
    600
}

const fn default_primary_unit_timeout() -> u64 {
    900
}

const fn default_settle_timeout() -> u64 {
    3600
}
