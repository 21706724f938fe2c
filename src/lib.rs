// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stack Converge
//!
//! An idempotent convergence engine driving a declarative infrastructure
//! provisioner and a model-based application orchestrator.
//!
//! ## Overview
//!
//! Every operation is expressed as a plan of [`step::Step`]s. A step first
//! checks, without side effects, whether its end state already holds and
//! only then does its work, so any plan can be re-run after a partial
//! failure:
//!
//! - Provisioner variables are reconciled from the values applied last, the
//!   deployment manifest and explicit overrides
//! - A locked remote state is retried at a fixed interval up to a deadline
//! - Long procedures persist their last completed phase in the cluster
//!   registry and resume from it
//!
//! ## Modules
//!
//! - [`config`]: `converge.yaml` and manifest parsing and validation
//! - [`registry`]: cluster registry backends (HTTP, local, memory)
//! - [`reconciler`]: provisioner variable reconciliation
//! - [`provisioner`]: provisioner CLI adapter and lock retry
//! - [`orchestrator`]: orchestrator CLI client and status waits
//! - [`step`]: the step model and plan runner
//! - [`steps`]: concrete steps and plan builders
//! - [`upgrade`]: resumable upgrade procedures
//! - [`cli`]: command-line interface
//!
//! ## Example
//!
//! ```yaml
//! registry:
//!   backend: http
//!   address: https://10.0.0.1:7000/1.0
//! manifest: manifest.yaml
//! plans:
//!   - name: openstack-plan
//!     directory: deploy-openstack
//!     config_key: TerraformVarsOpenstack
//!     application: keystone
//!     tfvars:
//!       components:
//!         keystone-k8s:
//!           channel: keystone-channel
//!           config: keystone-config
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod deployment;
pub mod error;
pub mod orchestrator;
pub mod outcome;
pub mod provisioner;
pub mod reconciler;
pub mod registry;
pub mod runner;
pub mod step;
pub mod steps;
pub mod upgrade;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, EngineConfig, Manifest};
pub use deployment::Deployment;
pub use error::{ConvergeError, Result};
pub use orchestrator::{Orchestrator, OrchestratorCli};
pub use outcome::{Outcome, OutcomeKind};
pub use provisioner::{LockRetryPolicy, Provisioner};
pub use reconciler::{VariableReconciler, VariableSet};
pub use registry::{HttpRegistry, LocalRegistry, MemoryRegistry, Registry};
pub use step::{PlanReport, PlanRunner, RunContext, Step};
pub use upgrade::{DatabaseUpgradeStep, PhaseTracker};
