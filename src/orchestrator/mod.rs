//! Application orchestrator access.
//!
//! - [`Orchestrator`]: operations on deployed applications
//! - [`OrchestratorCli`]: implementation over the orchestrator's CLI
//! - [`wait_for_application_status`] and [`wait_for_unit_upgrade`]: bounded
//!   status polling

mod client;
mod types;
mod wait;

#[cfg(test)]
pub use client::MockOrchestrator;
pub use client::{Orchestrator, OrchestratorCli};
pub use types::{ActionResult, ApplicationInfo, UnitInfo, unit_ordinal};
pub use wait::{WaitPolicy, wait_for_application_status, wait_for_unit_upgrade, wait_until};
