//! Steps acting on a plan's provisioner state.

use async_trait::async_trait;
use tracing::info;

use crate::outcome::Outcome;
use crate::provisioner::{LockRetryPolicy, Provisioner};
use crate::registry::delete_config_if_present;
use crate::step::{RunContext, Step};

/// Initialises the plan directory and its remote-state backend.
#[derive(Debug)]
pub struct InitProvisionerStep {
    provisioner: Provisioner,
    description: String,
}

impl InitProvisionerStep {
    /// Creates the step.
    #[must_use]
    pub fn new(provisioner: Provisioner) -> Self {
        let description = format!("Initialising plan {}", provisioner.plan());
        Self {
            provisioner,
            description,
        }
    }
}

#[async_trait]
impl Step for InitProvisionerStep {
    fn name(&self) -> &str {
        "Initialise provisioner"
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn run(&mut self, _ctx: &RunContext) -> Outcome {
        self.provisioner.init().await.into()
    }
}

/// Destroys every resource of a plan and forgets its variables.
#[derive(Debug)]
pub struct DestroyPlanStep {
    provisioner: Provisioner,
    config_key: String,
    retry: LockRetryPolicy,
    description: String,
}

impl DestroyPlanStep {
    /// Creates the step.
    #[must_use]
    pub fn new(provisioner: Provisioner, config_key: impl Into<String>, retry: LockRetryPolicy) -> Self {
        let description = format!("Destroying resources of plan {}", provisioner.plan());
        Self {
            provisioner,
            config_key: config_key.into(),
            retry,
            description,
        }
    }
}

#[async_trait]
impl Step for DestroyPlanStep {
    fn name(&self) -> &str {
        "Destroy plan"
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn is_skip(&mut self, _ctx: &RunContext) -> Outcome {
        match self.provisioner.has_resources().await {
            Ok(true) => Outcome::completed(),
            Ok(false) => Outcome::skipped().with_message(format!("plan {} holds no resources", self.provisioner.plan())),
            Err(e) => Outcome::from_error(&e),
        }
    }

    async fn run(&mut self, ctx: &RunContext) -> Outcome {
        let operation = format!("destroy {}", self.provisioner.plan());
        if let Err(e) = self.retry.run(&operation, || self.provisioner.destroy()).await {
            return Outcome::from_error(&e);
        }

        match delete_config_if_present(ctx.registry.as_ref(), &self.config_key).await {
            Ok(existed) => {
                info!(
                    "Plan {} destroyed, variables under {} {}",
                    self.provisioner.plan(),
                    self.config_key,
                    if existed { "removed" } else { "were already absent" }
                );
                Outcome::completed()
            }
            Err(e) => Outcome::from_error(&e),
        }
    }
}
