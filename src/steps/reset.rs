//! Operator reset of a resumable procedure.

use async_trait::async_trait;
use tracing::warn;

use crate::outcome::Outcome;
use crate::registry::delete_config_if_present;
use crate::step::{RunContext, Step};

/// Deletes the persisted phase of a procedure so the next run starts over.
#[derive(Debug)]
pub struct ResetUpgradeStateStep {
    state_key: String,
    description: String,
}

impl ResetUpgradeStateStep {
    /// Creates the step for the procedure stored under `state_key`.
    #[must_use]
    pub fn new(state_key: impl Into<String>) -> Self {
        let state_key = state_key.into();
        let description = format!("Resetting upgrade state {state_key}");
        Self {
            state_key,
            description,
        }
    }
}

#[async_trait]
impl Step for ResetUpgradeStateStep {
    fn name(&self) -> &str {
        "Reset upgrade state"
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn run(&mut self, ctx: &RunContext) -> Outcome {
        match delete_config_if_present(ctx.registry.as_ref(), &self.state_key).await {
            Ok(true) => Outcome::completed().with_message(format!("{} cleared", self.state_key)),
            Ok(false) => {
                warn!("No upgrade state under {}, nothing to reset", self.state_key);
                Outcome::completed().with_message(format!("{} was not set", self.state_key))
            }
            Err(e) => Outcome::from_error(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_reset_deletes_state() {
        let registry = Arc::new(MemoryRegistry::with_entries([(
            "mysql_k8s_upgrade_state",
            json!({"state": "SCALED_UP"}),
        )]));
        let ctx = RunContext::new(registry.clone());

        let outcome = ResetUpgradeStateStep::new("mysql_k8s_upgrade_state").run(&ctx).await;

        assert!(outcome.is_completed());
        assert!(registry.keys().await.is_empty());
    }

    #[test]
    fn test_reset_tolerates_missing_state() {
        let ctx = RunContext::new(Arc::new(MemoryRegistry::new()));
        let mut step = ResetUpgradeStateStep::new("mysql_k8s_upgrade_state");

        let outcome = tokio_test::block_on(step.run(&ctx));

        assert!(outcome.is_completed());
        assert_eq!(outcome.message(), Some("mysql_k8s_upgrade_state was not set"));
    }
}
