//! Provisioner remote-state lock records.
//!
//! The registry's HTTP state backend stores the lock the provisioner takes
//! while it mutates a plan's state. Operators can inspect it and, when a run
//! died holding it, release it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lock record written by the provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProvisionerLock {
    /// Unique lock identifier.
    #[serde(rename = "ID")]
    pub id: String,
    /// Operation holding the lock (e.g. `OperationTypeApply`).
    #[serde(default)]
    pub operation: String,
    /// Free-form info.
    #[serde(default)]
    pub info: String,
    /// `user@host` that took the lock.
    #[serde(default)]
    pub who: String,
    /// Provisioner version.
    #[serde(default)]
    pub version: String,
    /// When the lock was taken.
    pub created: DateTime<Utc>,
    /// State path.
    #[serde(default)]
    pub path: String,
}

impl ProvisionerLock {
    /// Age of the lock relative to `now`, in whole seconds.
    #[must_use]
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created).num_seconds().max(0)
    }
}

/// Generates an identifier for the current operator process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get().map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}
