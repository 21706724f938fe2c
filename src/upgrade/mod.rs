//! Resumable upgrade procedures.
//!
//! A procedure is an ordered list of [`Phase`]s. The last completed phase is
//! persisted in the registry by a [`PhaseTracker`], so a run interrupted at
//! any point resumes from where it stopped and the record disappears once
//! the procedure completes.

mod database;
mod phase;
mod tracker;

pub use database::{DatabasePhase, DatabaseUpgradeData, DatabaseUpgradeStep, target_scale};
pub use phase::{Phase, PhaseRanks};
pub use tracker::{PhaseRecord, PhaseTracker};
