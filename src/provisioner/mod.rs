//! Provisioner adapter.
//!
//! This module wraps the infrastructure provisioner CLI:
//!
//! - [`Provisioner`]: init, apply, destroy, output and state operations
//! - [`HttpBackend`]: remote state kept in the cluster registry
//! - [`LockSignature`]: detection of a locked remote state
//! - [`LockRetryPolicy`]: fixed-interval retry on lock contention

mod adapter;
mod backend;
mod lock;
mod retry;

pub use adapter::{Provisioner, TFVARS_FILE};
pub use backend::{BACKEND_FILE, HttpBackend, write_if_changed};
pub use lock::LockSignature;
pub use retry::LockRetryPolicy;
