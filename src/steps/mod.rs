//! Concrete steps and the plans built from them.
//!
//! - [`InitProvisionerStep`] / [`DestroyPlanStep`]: plan lifecycle
//! - [`ApplyVariablesStep`] / [`DeployApplicationStep`]: reconcile and apply
//! - [`ResetUpgradeStateStep`]: discard an interrupted procedure

mod plans;
mod provisioner;
mod reset;
mod variables;

pub use plans::{DeployOptions, database_upgrade_plan, deploy_plan, destroy_plan};
pub use provisioner::{DestroyPlanStep, InitProvisionerStep};
pub use reset::ResetUpgradeStateStep;
pub use variables::{ApplyVariablesStep, DeployApplicationStep, VariableApply};
