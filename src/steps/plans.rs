//! Plan builders assembling the steps of each command.

use std::time::Duration;

use crate::deployment::Deployment;
use crate::error::Result;
use crate::reconciler::VariableSet;
use crate::step::Step;
use crate::upgrade::DatabaseUpgradeStep;

use super::provisioner::{DestroyPlanStep, InitProvisionerStep};
use super::reset::ResetUpgradeStateStep;
use super::variables::{ApplyVariablesStep, DeployApplicationStep, VariableApply};

/// Options of a deploy run.
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Application to wait for, overriding the plan's.
    pub application: Option<String>,
    /// Explicit variable overrides.
    pub overrides: VariableSet,
    /// Restrict manifest resolution to these components.
    pub components: Option<Vec<String>>,
    /// Apply even if the variables did not change.
    pub refresh: bool,
}

/// Initialises and applies `plan`, waiting for its application if it has one.
///
/// # Errors
///
/// Returns an error if the plan is not declared.
pub fn deploy_plan(deployment: &Deployment, plan: &str, options: DeployOptions) -> Result<Vec<Box<dyn Step>>> {
    let plan_config = deployment.plan(plan)?;
    let provisioner = deployment.provisioner(plan)?;

    let mut core = VariableApply::new(
        provisioner.clone(),
        plan_config,
        deployment.manifest(),
        deployment.retry_policy(),
    )
    .with_overrides(options.overrides);
    if let Some(components) = options.components {
        core = core.with_components(components);
    }

    let apply: Box<dyn Step> = match options.application.or_else(|| plan_config.application.clone()) {
        Some(application) => Box::new(
            DeployApplicationStep::new(
                core,
                application,
                deployment.orchestrator(),
                deployment.config().orchestrator.accepted_statuses.clone(),
                deployment.wait_policy(),
            )
            .forced(options.refresh),
        ),
        None => Box::new(ApplyVariablesStep::new(core).forced(options.refresh)),
    };

    Ok(vec![Box::new(InitProvisionerStep::new(provisioner)), apply])
}

/// Initialises `plan` and destroys its resources.
///
/// # Errors
///
/// Returns an error if the plan is not declared.
pub fn destroy_plan(deployment: &Deployment, plan: &str) -> Result<Vec<Box<dyn Step>>> {
    let plan_config = deployment.plan(plan)?;
    let provisioner = deployment.provisioner(plan)?;

    Ok(vec![
        Box::new(InitProvisionerStep::new(provisioner.clone())),
        Box::new(DestroyPlanStep::new(
            provisioner,
            &plan_config.config_key,
            deployment.retry_policy(),
        )),
    ])
}

/// Refreshes the database in its channel, optionally discarding the
/// progress of an earlier attempt first.
///
/// # Errors
///
/// Returns an error if the upgrade step cannot be created.
pub fn database_upgrade_plan(deployment: &Deployment, reset: bool) -> Result<Vec<Box<dyn Step>>> {
    let settings = deployment.config().upgrade.database.clone();
    let poll_interval = Duration::from_secs(deployment.config().orchestrator.poll_interval_secs);

    let mut steps: Vec<Box<dyn Step>> = Vec::new();
    if reset {
        steps.push(Box::new(ResetUpgradeStateStep::new(&settings.state_key)));
    }
    steps.push(Box::new(DatabaseUpgradeStep::new(
        deployment.orchestrator(),
        deployment.manifest(),
        settings,
        poll_interval,
    )?));
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, Manifest};
    use crate::orchestrator::MockOrchestrator;
    use crate::registry::MemoryRegistry;
    use crate::runner::testing::ScriptedRunner;
    use std::sync::Arc;

    fn deployment() -> Deployment {
        let config = ConfigParser::new()
            .parse_yaml(
                r"
plans:
  - name: openstack-plan
    directory: deploy-openstack
    config_key: TerraformVarsOpenstack
    application: keystone
  - name: microceph-plan
    directory: deploy-microceph
    config_key: TerraformVarsMicroceph
",
                None,
            )
            .expect("config");
        Deployment::new(
            config,
            Manifest::default(),
            Arc::new(MemoryRegistry::new()),
            Arc::new(ScriptedRunner::new()),
            Arc::new(MockOrchestrator::new()),
        )
    }

    fn names(steps: &[Box<dyn Step>]) -> Vec<&str> {
        steps.iter().map(|s| s.name()).collect()
    }

    #[test]
    fn test_deploy_plan_waits_for_declared_application() {
        let steps = deploy_plan(&deployment(), "openstack-plan", DeployOptions::default()).expect("plan");
        assert_eq!(names(&steps), vec!["Initialise provisioner", "Deploy application"]);
        assert_eq!(steps[1].description(), "Deploying keystone");
    }

    #[test]
    fn test_deploy_plan_without_application_only_applies() {
        let steps = deploy_plan(&deployment(), "microceph-plan", DeployOptions::default()).expect("plan");
        assert_eq!(names(&steps), vec!["Initialise provisioner", "Apply variables"]);
    }

    #[test]
    fn test_unknown_plan_is_rejected() {
        assert!(deploy_plan(&deployment(), "missing", DeployOptions::default()).is_err());
        assert!(destroy_plan(&deployment(), "missing").is_err());
    }

    #[test]
    fn test_destroy_plan() {
        let steps = destroy_plan(&deployment(), "openstack-plan").expect("plan");
        assert_eq!(names(&steps), vec!["Initialise provisioner", "Destroy plan"]);
    }

    #[test]
    fn test_database_upgrade_plan_prepends_reset() {
        let d = deployment();
        assert_eq!(names(&database_upgrade_plan(&d, false).expect("plan")), vec!["Database upgrade"]);
        assert_eq!(
            names(&database_upgrade_plan(&d, true).expect("plan")),
            vec!["Reset upgrade state", "Database upgrade"]
        );
    }
}
