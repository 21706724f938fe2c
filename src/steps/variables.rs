//! Steps applying reconciled variables to a plan.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{Manifest, PlanConfig, TfvarMap};
use crate::error::Result;
use crate::orchestrator::{Orchestrator, WaitPolicy, wait_for_application_status};
use crate::outcome::Outcome;
use crate::provisioner::{LockRetryPolicy, Provisioner};
use crate::reconciler::{ReconcileRequest, VariableReconciler, VariableSet};
use crate::registry::read_config;
use crate::step::{RunContext, Step};

/// Reconcile-then-apply shared by the variable steps.
///
/// Variables are computed without being persisted and written back only
/// after the provisioner applied them, so a failed apply leaves the
/// registry untouched.
#[derive(Debug, Clone)]
pub struct VariableApply {
    provisioner: Provisioner,
    config_key: String,
    tfvars: TfvarMap,
    manifest: Arc<Manifest>,
    overrides: VariableSet,
    components: Option<Vec<String>>,
    retry: LockRetryPolicy,
}

impl VariableApply {
    /// Creates the core for `plan`.
    #[must_use]
    pub fn new(provisioner: Provisioner, plan: &PlanConfig, manifest: Arc<Manifest>, retry: LockRetryPolicy) -> Self {
        Self {
            provisioner,
            config_key: plan.config_key.clone(),
            tfvars: plan.tfvars.clone(),
            manifest,
            overrides: VariableSet::new(),
            components: None,
            retry,
        }
    }

    /// Sets explicit overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: VariableSet) -> Self {
        self.overrides = overrides;
        self
    }

    /// Restricts manifest resolution to `components`.
    #[must_use]
    pub fn with_components(mut self, components: Vec<String>) -> Self {
        self.components = Some(components);
        self
    }

    /// Registry key of the plan's variables.
    #[must_use]
    pub fn config_key(&self) -> &str {
        &self.config_key
    }

    async fn compute(&self, ctx: &RunContext) -> Result<VariableSet> {
        let mut request = ReconcileRequest::new(&self.config_key, &self.tfvars, &self.manifest)
            .with_overrides(&self.overrides)
            .without_persist();
        if let Some(components) = &self.components {
            request = request.with_selected_components(components);
        }
        VariableReconciler::new(ctx.registry.clone()).reconcile(&request).await
    }

    /// Returns true if the persisted variables match what would be applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    pub async fn is_current(&self, ctx: &RunContext) -> Result<bool> {
        let Some(persisted) = read_config::<VariableSet>(ctx.registry.as_ref(), &self.config_key).await? else {
            debug!("No variables persisted under {}", self.config_key);
            return Ok(false);
        };
        Ok(persisted == self.compute(ctx).await?)
    }

    /// Applies the reconciled variables and persists them.
    ///
    /// # Errors
    ///
    /// Returns an error if reconciliation fails, the apply fails (after lock
    /// retries), or the variables cannot be persisted.
    pub async fn apply(&self, ctx: &RunContext) -> Result<VariableSet> {
        let variables = self.compute(ctx).await?;
        ctx.status.update(format!(
            "Applying {} variable(s) to plan {}",
            variables.len(),
            self.provisioner.plan()
        ));

        let operation = format!("apply {}", self.provisioner.plan());
        self.retry
            .run(&operation, || self.provisioner.apply(&variables, &[]))
            .await?;

        VariableReconciler::new(ctx.registry.clone())
            .persist(&self.config_key, &variables)
            .await?;
        Ok(variables)
    }
}

/// Applies a plan whose resources need no orchestrator wait.
#[derive(Debug)]
pub struct ApplyVariablesStep {
    core: VariableApply,
    force: bool,
    description: String,
}

impl ApplyVariablesStep {
    /// Creates the step.
    #[must_use]
    pub fn new(core: VariableApply) -> Self {
        let description = format!("Applying configuration of plan {}", core.provisioner.plan());
        Self {
            core,
            force: false,
            description,
        }
    }

    /// Applies even when the variables did not change.
    #[must_use]
    pub const fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

#[async_trait]
impl Step for ApplyVariablesStep {
    fn name(&self) -> &str {
        "Apply variables"
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn is_skip(&mut self, ctx: &RunContext) -> Outcome {
        if self.force {
            return Outcome::completed();
        }
        match self.core.is_current(ctx).await {
            Ok(true) => Outcome::skipped().with_message("variables unchanged"),
            Ok(false) => Outcome::completed(),
            Err(e) => Outcome::from_error(&e),
        }
    }

    async fn run(&mut self, ctx: &RunContext) -> Outcome {
        match self.core.apply(ctx).await {
            Ok(variables) => Outcome::completed()
                .with_message(format!("applied {} variable(s)", variables.len())),
            Err(e) => Outcome::from_error(&e),
        }
    }
}

/// Applies a plan, then waits for the application it deploys to settle.
pub struct DeployApplicationStep {
    core: VariableApply,
    application: String,
    orchestrator: Arc<dyn Orchestrator>,
    accepted: Vec<String>,
    wait: WaitPolicy,
    force: bool,
    description: String,
}

impl std::fmt::Debug for DeployApplicationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployApplicationStep")
            .field("application", &self.application)
            .field("accepted", &self.accepted)
            .finish_non_exhaustive()
    }
}

impl DeployApplicationStep {
    /// Creates the step.
    #[must_use]
    pub fn new(
        core: VariableApply,
        application: impl Into<String>,
        orchestrator: Arc<dyn Orchestrator>,
        accepted: Vec<String>,
        wait: WaitPolicy,
    ) -> Self {
        let application = application.into();
        let description = format!("Deploying {application}");
        Self {
            core,
            application,
            orchestrator,
            accepted,
            wait,
            force: false,
            description,
        }
    }

    /// Applies even when the variables did not change.
    #[must_use]
    pub const fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    async fn settled(&self) -> Result<bool> {
        Ok(self
            .orchestrator
            .get_application(&self.application)
            .await?
            .is_some_and(|app| app.settled(&self.accepted)))
    }
}

#[async_trait]
impl Step for DeployApplicationStep {
    fn name(&self) -> &str {
        "Deploy application"
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn is_skip(&mut self, ctx: &RunContext) -> Outcome {
        if self.force {
            return Outcome::completed();
        }
        let current = match self.core.is_current(ctx).await {
            Ok(current) => current,
            Err(e) => return Outcome::from_error(&e),
        };
        if !current {
            return Outcome::completed();
        }
        match self.settled().await {
            Ok(true) => Outcome::skipped().with_message(format!("{} already deployed", self.application)),
            Ok(false) => Outcome::completed(),
            Err(e) => Outcome::from_error(&e),
        }
    }

    async fn run(&mut self, ctx: &RunContext) -> Outcome {
        if let Err(e) = self.core.apply(ctx).await {
            return Outcome::from_error(&e);
        }

        ctx.status.update(format!(
            "Waiting for {} to reach {}",
            self.application,
            self.accepted.join("|")
        ));
        match wait_for_application_status(self.orchestrator.as_ref(), &self.application, &self.accepted, self.wait).await {
            Ok(app) => {
                info!("{} settled: {}", self.application, app.summary());
                Outcome::completed().with_message(format!("{} is {}", self.application, app.status))
            }
            Err(e) => Outcome::from_error(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{ApplicationInfo, MockOrchestrator, UnitInfo};
    use crate::registry::{MemoryRegistry, Registry};
    use crate::runner::testing::ScriptedRunner;
    use crate::config::ComponentManifest;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    const KEY: &str = "TerraformVarsOpenstack";

    fn plan() -> PlanConfig {
        PlanConfig {
            name: String::from("openstack-plan"),
            directory: "deploy-openstack".into(),
            config_key: KEY.to_string(),
            tfvars: TfvarMap::default().with_binding("keystone-k8s", "channel", "keystone-channel"),
            application: Some(String::from("keystone")),
        }
    }

    fn manifest() -> Arc<Manifest> {
        Arc::new(Manifest::default().with_core_component(
            "keystone-k8s",
            ComponentManifest {
                channel: Some(String::from("2024.1/stable")),
                ..ComponentManifest::default()
            },
        ))
    }

    fn core(dir: &TempDir, runner: &Arc<ScriptedRunner>) -> VariableApply {
        let provisioner = Provisioner::new("openstack-plan", dir.path(), runner.clone());
        let retry = LockRetryPolicy {
            interval: Duration::from_secs(60),
            deadline: Duration::from_secs(300),
        };
        VariableApply::new(provisioner, &plan(), manifest(), retry)
    }

    fn keystone(status: &str) -> ApplicationInfo {
        ApplicationInfo {
            name: String::from("keystone"),
            status: status.to_string(),
            charm_revision: Some(200),
            charm_channel: Some(String::from("2024.1/stable")),
            scale: 1,
            units: [(
                String::from("keystone/0"),
                UnitInfo {
                    workload_status: status.to_string(),
                    agent_status: String::from("idle"),
                    leader: true,
                    ..UnitInfo::default()
                },
            )]
            .into_iter()
            .collect(),
        }
    }

    fn accepted() -> Vec<String> {
        vec![String::from("active"), String::from("unknown")]
    }

    #[tokio::test]
    async fn test_apply_persists_after_success() {
        let dir = TempDir::new().expect("tempdir");
        let runner = Arc::new(ScriptedRunner::new());
        let registry = Arc::new(MemoryRegistry::new());
        let ctx = RunContext::new(registry.clone());
        let mut step = ApplyVariablesStep::new(core(&dir, &runner));

        assert!(step.is_skip(&ctx).await.is_completed());
        assert!(step.run(&ctx).await.is_completed());

        let stored = registry.get(KEY).await.expect("get").expect("persisted");
        assert_eq!(stored, json!({"keystone-channel": "2024.1/stable"}));
        let written = std::fs::read_to_string(dir.path().join(crate::provisioner::TFVARS_FILE)).expect("tfvars");
        assert!(written.contains("2024.1/stable"));

        assert!(step.is_skip(&ctx).await.is_skipped());
    }

    #[tokio::test]
    async fn test_failed_apply_persists_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_failure(1, "Error: invalid provider configuration");
        let registry = Arc::new(MemoryRegistry::new());
        let ctx = RunContext::new(registry.clone());

        let outcome = ApplyVariablesStep::new(core(&dir, &runner)).run(&ctx).await;

        assert!(outcome.is_failed());
        assert!(outcome.message().unwrap_or_default().contains("invalid provider configuration"));
        assert!(registry.keys().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_retries_locked_state() {
        let dir = TempDir::new().expect("tempdir");
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_failure(1, "Error: remote state already locked");
        let registry = Arc::new(MemoryRegistry::new());
        let ctx = RunContext::new(registry.clone());

        let outcome = ApplyVariablesStep::new(core(&dir, &runner)).run(&ctx).await;

        assert!(outcome.is_completed(), "{outcome}");
        assert_eq!(runner.args().len(), 2);
    }

    #[tokio::test]
    async fn test_forced_apply_ignores_unchanged_variables() {
        let dir = TempDir::new().expect("tempdir");
        let runner = Arc::new(ScriptedRunner::new());
        let registry = Arc::new(MemoryRegistry::with_entries([(
            KEY,
            json!({"keystone-channel": "2024.1/stable"}),
        )]));
        let ctx = RunContext::new(registry);

        let mut step = ApplyVariablesStep::new(core(&dir, &runner));
        assert!(step.is_skip(&ctx).await.is_skipped());
        let mut step = step.forced(true);
        assert!(step.is_skip(&ctx).await.is_completed());
    }

    #[tokio::test]
    async fn test_overrides_merge_into_persisted_objects() {
        let dir = TempDir::new().expect("tempdir");
        let runner = Arc::new(ScriptedRunner::new());
        let registry = Arc::new(MemoryRegistry::with_entries([(
            KEY,
            json!({"keystone-config": {"debug": true}}),
        )]));
        let ctx = RunContext::new(registry.clone());
        let mut overrides = VariableSet::new();
        overrides.insert(String::from("keystone-config"), json!({"region": "RegionTwo"}));

        let applied = core(&dir, &runner)
            .with_overrides(overrides)
            .apply(&ctx)
            .await
            .expect("apply");

        assert_eq!(
            serde_json::Value::Object(applied),
            json!({
                "keystone-channel": "2024.1/stable",
                "keystone-config": {"debug": true, "region": "RegionTwo"}
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_waits_for_application() {
        let dir = TempDir::new().expect("tempdir");
        let runner = Arc::new(ScriptedRunner::new());
        let registry = Arc::new(MemoryRegistry::new());
        let ctx = RunContext::new(registry.clone());

        let mut orchestrator = MockOrchestrator::new();
        let mut seq = mockall::Sequence::new();
        orchestrator
            .expect_get_application()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(keystone("maintenance"))));
        orchestrator
            .expect_get_application()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(keystone("active"))));

        let mut step = DeployApplicationStep::new(
            core(&dir, &runner),
            "keystone",
            Arc::new(orchestrator),
            accepted(),
            WaitPolicy::new(Duration::from_secs(10), Duration::from_secs(60)),
        );

        assert!(step.is_skip(&ctx).await.is_completed());
        let outcome = step.run(&ctx).await;
        assert!(outcome.is_completed(), "{outcome}");
        assert_eq!(outcome.message(), Some("keystone is active"));
        assert!(registry.get(KEY).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_deploy_skipped_when_settled_and_unchanged() {
        let dir = TempDir::new().expect("tempdir");
        let runner = Arc::new(ScriptedRunner::new());
        let registry = Arc::new(MemoryRegistry::with_entries([(
            KEY,
            json!({"keystone-channel": "2024.1/stable"}),
        )]));
        let ctx = RunContext::new(registry);

        let mut orchestrator = MockOrchestrator::new();
        orchestrator
            .expect_get_application()
            .returning(|_| Ok(Some(keystone("active"))));

        let mut step = DeployApplicationStep::new(
            core(&dir, &runner),
            "keystone",
            Arc::new(orchestrator),
            accepted(),
            WaitPolicy::new(Duration::from_secs(10), Duration::from_secs(60)),
        );

        assert!(step.is_skip(&ctx).await.is_skipped());
        assert!(runner.args().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_wait_timeout_fails() {
        let dir = TempDir::new().expect("tempdir");
        let runner = Arc::new(ScriptedRunner::new());
        let ctx = RunContext::new(Arc::new(MemoryRegistry::new()));

        let mut orchestrator = MockOrchestrator::new();
        orchestrator
            .expect_get_application()
            .returning(|_| Ok(Some(keystone("blocked"))));

        let outcome = DeployApplicationStep::new(
            core(&dir, &runner),
            "keystone",
            Arc::new(orchestrator),
            accepted(),
            WaitPolicy::new(Duration::from_secs(10), Duration::from_secs(30)),
        )
        .run(&ctx)
        .await;

        assert!(outcome.is_failed());
        assert!(outcome.message().unwrap_or_default().contains("blocked"));
    }
}
