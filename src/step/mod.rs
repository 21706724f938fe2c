//! Step execution model.
//!
//! A [`Step`] is one unit of idempotent work: a read-only skip-check that
//! tells whether the end state already holds, and a body that brings it
//! about. A plan is an ordered `Vec<Box<dyn Step>>` executed by
//! [`PlanRunner`].

mod context;
mod runner;

use async_trait::async_trait;

use crate::outcome::Outcome;

pub use context::{RunContext, StatusSink};
pub use runner::{PlanReport, PlanRunner, StepRecord};

/// A single unit of idempotent work.
#[async_trait]
pub trait Step: Send {
    /// Short name.
    fn name(&self) -> &str;

    /// Human-readable description shown while the step runs.
    fn description(&self) -> &str;

    /// Checks whether the step must run.
    ///
    /// Returns SKIPPED when the end state already holds, FAILED when that
    /// cannot be determined, COMPLETED otherwise. Must not change the
    /// target system.
    async fn is_skip(&mut self, _ctx: &RunContext) -> Outcome {
        Outcome::completed()
    }

    /// Performs the work.
    async fn run(&mut self, ctx: &RunContext) -> Outcome;
}
