//! Sequential execution of a plan of steps.

use serde::Serialize;
use std::fmt;
use tracing::{Instrument, debug, error, info, info_span};

use crate::outcome::{Outcome, OutcomeKind};

use super::context::RunContext;
use super::Step;

/// What happened to a single step.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    /// Step name.
    pub name: String,
    /// Step description.
    pub description: String,
    /// Whether the body ran.
    pub ran: bool,
    /// Skip-check outcome, or the body outcome when it ran.
    pub outcome: Outcome,
}

/// Result of running a plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    /// Plan name.
    pub plan: String,
    /// Steps that were reached, in order.
    pub steps: Vec<StepRecord>,
    /// Overall outcome.
    pub outcome: Outcome,
}

impl PlanReport {
    /// Returns true unless a step failed.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.outcome.is_failed()
    }

    /// Number of steps whose body ran.
    #[must_use]
    pub fn executed(&self) -> usize {
        self.steps.iter().filter(|s| s.ran).count()
    }
}

impl fmt::Display for PlanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Plan {}: {}", self.plan, self.outcome)?;
        for step in &self.steps {
            let marker = if step.ran { "ran" } else { "checked" };
            writeln!(f, "  {} ({marker}): {}", step.name, step.outcome)?;
        }
        Ok(())
    }
}

/// Runs steps in declaration order, stopping at the first failure.
#[derive(Debug, Clone)]
pub struct PlanRunner {
    name: String,
}

impl PlanRunner {
    /// Creates a runner for the plan called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Runs `steps` against `ctx`.
    ///
    /// Each step is skip-checked first. A skipped step is passed over, a
    /// failed skip-check or body aborts the plan.
    pub async fn run(&self, steps: Vec<Box<dyn Step>>, ctx: &RunContext) -> PlanReport {
        let span = info_span!("plan", plan = %self.name, run_id = %ctx.run_id);
        self.run_steps(steps, ctx).instrument(span).await
    }

    async fn run_steps(&self, steps: Vec<Box<dyn Step>>, ctx: &RunContext) -> PlanReport {
        info!("Running plan {} ({} steps)", self.name, steps.len());
        let mut records = Vec::with_capacity(steps.len());
        let mut last_completed: Option<Outcome> = None;

        for mut step in steps {
            let name = step.name().to_string();
            let description = step.description().to_string();
            ctx.status.update(description.clone());

            let check = step.is_skip(ctx).await;
            match check.kind() {
                OutcomeKind::Skipped => {
                    debug!("Skipping step {name}: {}", check.message().unwrap_or(""));
                    records.push(StepRecord {
                        name,
                        description,
                        ran: false,
                        outcome: check,
                    });
                    continue;
                }
                OutcomeKind::Failed => {
                    error!("Skip-check of step {name} failed: {check}");
                    return self.aborted(records, name, description, false, check);
                }
                OutcomeKind::Completed => {}
            }

            debug!("Running step {name}");
            let outcome = step.run(ctx).await;
            if outcome.is_failed() {
                error!("Step {name} failed: {outcome}");
                return self.aborted(records, name, description, true, outcome);
            }

            info!("Step {name} completed");
            last_completed = Some(outcome.clone());
            records.push(StepRecord {
                name,
                description,
                ran: true,
                outcome,
            });
        }

        let outcome = last_completed.unwrap_or_else(|| Outcome::skipped().with_message("nothing to do"));
        info!("Plan {} finished: {}", self.name, outcome.kind());
        PlanReport {
            plan: self.name.clone(),
            steps: records,
            outcome,
        }
    }

    fn aborted(
        &self,
        mut records: Vec<StepRecord>,
        name: String,
        description: String,
        ran: bool,
        outcome: Outcome,
    ) -> PlanReport {
        records.push(StepRecord {
            name,
            description,
            ran,
            outcome: outcome.clone(),
        });
        PlanReport {
            plan: self.name.clone(),
            steps: records,
            outcome,
        }
    }
}
