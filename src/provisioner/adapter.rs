//! Provisioner CLI adapter.
//!
//! Every invocation runs inside the plan directory with its own timestamped
//! `TF_LOG_PATH`. A failed command whose stderr matches the lock signature
//! becomes [`ProvisionerError::StateLocked`]; any other failure becomes
//! [`ProvisionerError::CommandFailed`] carrying stderr.

use chrono::Local;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, error, info};

use crate::config::{EngineConfig, PlanConfig};
use crate::error::{ProvisionerError, Result};
use crate::reconciler::VariableSet;
use crate::runner::{CommandOutput, CommandRunner, CommandSpec, RunError};

use super::backend::{BACKEND_FILE, HttpBackend, write_if_changed};
use super::lock::LockSignature;

/// Name of the variables file written before every apply.
pub const TFVARS_FILE: &str = "terraform.tfvars.json";

/// Adapter around the provisioner binary for one plan.
#[derive(Clone)]
pub struct Provisioner {
    plan: String,
    path: PathBuf,
    binary: PathBuf,
    env: BTreeMap<String, String>,
    log_level: String,
    parallelism: Option<u32>,
    backend: Option<HttpBackend>,
    apply_timeout: Duration,
    command_timeout: Duration,
    lock_signature: LockSignature,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("plan", &self.plan)
            .field("path", &self.path)
            .field("binary", &self.binary)
            .field("backend", &self.backend.is_some())
            .finish_non_exhaustive()
    }
}

impl Provisioner {
    /// Creates an adapter with default settings and local state.
    #[must_use]
    pub fn new(plan: impl Into<String>, path: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            plan: plan.into(),
            path: path.into(),
            binary: PathBuf::from("terraform"),
            env: BTreeMap::new(),
            log_level: String::from("INFO"),
            parallelism: None,
            backend: None,
            apply_timeout: Duration::from_secs(1200),
            command_timeout: Duration::from_secs(600),
            lock_signature: LockSignature::default(),
            runner,
        }
    }

    /// Creates the adapter of `plan` from the engine configuration.
    ///
    /// Remote state is configured only when the registry exposes a state
    /// endpoint.
    #[must_use]
    pub fn from_config(
        config: &EngineConfig,
        plan: &PlanConfig,
        state_endpoint: Option<&str>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let provisioner = &config.provisioner;
        let mut backend = state_endpoint.map(|endpoint| HttpBackend::for_plan(endpoint, &plan.name));
        if let Some(backend) = backend.as_mut() {
            backend.skip_cert_verification = config.registry.skip_cert_verification;
        }

        Self {
            binary: provisioner.binary.clone(),
            env: provisioner.env.clone(),
            log_level: provisioner.log_level.clone(),
            parallelism: provisioner.parallelism,
            backend,
            apply_timeout: Duration::from_secs(provisioner.apply_timeout_secs),
            command_timeout: Duration::from_secs(provisioner.command_timeout_secs),
            ..Self::new(&plan.name, config.plan_dir(plan), runner)
        }
    }

    /// Sets the provisioner binary.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Sets the remote-state backend.
    #[must_use]
    pub fn with_backend(mut self, backend: HttpBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Sets the `-parallelism` value.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    /// Adds an environment variable to every invocation.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the apply timeout.
    #[must_use]
    pub const fn with_apply_timeout(mut self, timeout: Duration) -> Self {
        self.apply_timeout = timeout;
        self
    }

    /// Replaces the lock signature.
    #[must_use]
    pub fn with_lock_signature(mut self, signature: LockSignature) -> Self {
        self.lock_signature = signature;
        self
    }

    /// Plan name.
    #[must_use]
    pub fn plan(&self) -> &str {
        &self.plan
    }

    /// Plan directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Environment of the invocation named `operation`.
    fn environment(&self, operation: &str) -> BTreeMap<String, String> {
        let timestamp = Local::now().format("%Y%m%d%H%M%S");
        let log_path = self.path.join(format!("terraform-{operation}-{timestamp}.log"));

        let mut env = self.env.clone();
        env.insert(String::from("TF_LOG_PATH"), log_path.display().to_string());
        if !env.contains_key("TF_LOG") && std::env::var_os("TF_LOG").is_none() {
            env.insert(String::from("TF_LOG"), self.log_level.clone());
        }
        env
    }

    async fn invoke(&self, operation: &str, args: Vec<String>, timeout: Duration) -> Result<CommandOutput> {
        let spec = CommandSpec::new(&self.binary)
            .args(args)
            .current_dir(&self.path)
            .envs(self.environment(operation))
            .timeout(timeout);
        debug!("Running {} in {}", spec.display(), self.path.display());

        let output = match self.runner.run(&spec).await {
            Ok(output) => output,
            Err(RunError::Launch { message, .. }) => {
                return Err(ProvisionerError::Launch { message }.into());
            }
            Err(RunError::TimedOut(elapsed)) => {
                error!("{operation} for plan {} timed out", self.plan);
                return Err(ProvisionerError::Timeout {
                    plan: self.plan.clone(),
                    command: operation.to_string(),
                    timeout_secs: elapsed.as_secs(),
                }
                .into());
            }
        };

        if output.success() {
            debug!("{operation} finished for plan {}", self.plan);
            return Ok(output);
        }

        let stderr = output.stderr.trim().to_string();
        if self.lock_signature.matches(&stderr) {
            info!("Remote state of plan {} is locked", self.plan);
            return Err(ProvisionerError::StateLocked {
                plan: self.plan.clone(),
                stderr,
            }
            .into());
        }

        error!("{operation} failed for plan {}: {stderr}", self.plan);
        Err(ProvisionerError::CommandFailed {
            plan: self.plan.clone(),
            command: operation.to_string(),
            stderr,
        }
        .into())
    }

    /// Initialises the plan directory.
    ///
    /// The backend file is rewritten only when its content changed, and only
    /// then is `-reconfigure` passed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written or `init` fails.
    pub async fn init(&self) -> Result<()> {
        let mut reconfigure = false;
        if let Some(backend) = &self.backend {
            let rendered = backend.render()?;
            reconfigure = write_if_changed(&self.path.join(BACKEND_FILE), &rendered).await?;
        }

        let mut args = vec![
            String::from("init"),
            String::from("-upgrade"),
            String::from("-no-color"),
        ];
        if reconfigure {
            debug!("Backend changed for plan {}, reconfiguring", self.plan);
            args.push(String::from("-reconfigure"));
        }

        self.invoke("init", args, self.command_timeout).await?;
        info!("Initialised plan {}", self.plan);
        Ok(())
    }

    /// Writes the variables file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn write_variables(&self, variables: &VariableSet) -> Result<()> {
        let content = serde_json::to_string(variables).map_err(|e| ProvisionerError::InvalidOutput {
            message: format!("Failed to encode variables: {e}"),
        })?;
        fs::write(self.path.join(TFVARS_FILE), content).await?;
        Ok(())
    }

    /// Writes `variables` and applies the plan.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::StateLocked`] when the remote state is
    /// locked, or another error if the apply fails.
    pub async fn apply(&self, variables: &VariableSet, extra_args: &[String]) -> Result<()> {
        self.write_variables(variables).await?;

        let mut args = vec![String::from("apply")];
        args.extend(extra_args.iter().cloned());
        args.push(String::from("-auto-approve"));
        args.push(String::from("-no-color"));
        args.extend(self.parallelism_arg());

        info!("Applying plan {}", self.plan);
        self.invoke("apply", args, self.apply_timeout).await?;
        Ok(())
    }

    /// Destroys every resource of the plan.
    ///
    /// # Errors
    ///
    /// Returns an error if `destroy` fails.
    pub async fn destroy(&self) -> Result<()> {
        let mut args = vec![
            String::from("destroy"),
            String::from("-auto-approve"),
            String::from("-no-color"),
            String::from("-input=false"),
        ];
        args.extend(self.parallelism_arg());

        info!("Destroying plan {}", self.plan);
        self.invoke("destroy", args, self.apply_timeout).await?;
        Ok(())
    }

    /// Reads the plan outputs as `name -> value`.
    ///
    /// # Errors
    ///
    /// Returns an error if `output` fails or prints something other than an
    /// object of outputs.
    pub async fn output(&self) -> Result<BTreeMap<String, Value>> {
        let args = vec![
            String::from("output"),
            String::from("-json"),
            String::from("-no-color"),
        ];
        let output = self.invoke("output", args, self.command_timeout).await?;

        let decoded: BTreeMap<String, Value> =
            serde_json::from_str(&output.stdout).map_err(|e| ProvisionerError::InvalidOutput {
                message: format!("output of plan {}: {e}", self.plan),
            })?;

        Ok(decoded
            .into_iter()
            .map(|(name, mut entry)| {
                let value = entry.get_mut("value").map(Value::take).unwrap_or(Value::Null);
                (name, value)
            })
            .collect())
    }

    /// Pulls the remote state document.
    ///
    /// # Errors
    ///
    /// Returns an error if `state pull` fails or prints invalid JSON.
    pub async fn pull_state(&self) -> Result<Value> {
        let args = vec![String::from("state"), String::from("pull")];
        let output = self.invoke("state", args, self.command_timeout).await?;

        if output.stdout.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&output.stdout).map_err(|e| {
            ProvisionerError::InvalidOutput {
                message: format!("state of plan {}: {e}", self.plan),
            }
            .into()
        })
    }

    /// Returns true if the pulled state holds at least one resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be pulled.
    pub async fn has_resources(&self) -> Result<bool> {
        let state = self.pull_state().await?;
        Ok(state
            .get("resources")
            .and_then(Value::as_array)
            .is_some_and(|resources| !resources.is_empty()))
    }

    /// Lists resource addresses in the state.
    ///
    /// # Errors
    ///
    /// Returns an error if `state list` fails.
    pub async fn state_list(&self) -> Result<Vec<String>> {
        let args = vec![String::from("state"), String::from("list")];
        let output = self.invoke("state-list", args, self.command_timeout).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    /// Removes `address` from the state without destroying it.
    ///
    /// # Errors
    ///
    /// Returns an error if `state rm` fails.
    pub async fn state_rm(&self, address: &str) -> Result<()> {
        let args = vec![
            String::from("state"),
            String::from("rm"),
            address.to_string(),
        ];
        self.invoke("state-rm", args, self.command_timeout).await?;
        info!("Removed {address} from plan {}", self.plan);
        Ok(())
    }

    /// Refreshes the state from the real resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh-only apply fails.
    pub async fn sync(&self) -> Result<()> {
        let args = vec![
            String::from("apply"),
            String::from("-refresh-only"),
            String::from("-auto-approve"),
        ];
        self.invoke("sync", args, self.apply_timeout).await?;
        Ok(())
    }

    fn parallelism_arg(&self) -> Option<String> {
        self.parallelism.map(|n| format!("-parallelism={n}"))
    }
}
