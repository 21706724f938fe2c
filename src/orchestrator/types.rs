//! Orchestrator data types.
//!
//! These mirror the parts of the orchestrator's JSON status the engine
//! relies on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Results of a completed action, keyed by result name.
pub type ActionResult = BTreeMap<String, Value>;

/// A deployed application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    /// Application name.
    pub name: String,
    /// Application status (`active`, `blocked`, ...).
    pub status: String,
    /// Deployed charm revision.
    pub charm_revision: Option<u64>,
    /// Deployed charm channel, e.g. `8.0/stable`.
    pub charm_channel: Option<String>,
    /// Number of units.
    pub scale: u32,
    /// Units keyed by unit name.
    pub units: BTreeMap<String, UnitInfo>,
}

/// A unit of an application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfo {
    /// Workload status.
    pub workload_status: String,
    /// Workload status message.
    pub workload_message: String,
    /// Agent status (`idle`, `executing`, ...).
    pub agent_status: String,
    /// Whether the unit is the application leader.
    pub leader: bool,
}

impl ApplicationInfo {
    /// Name of the leader unit, if any.
    #[must_use]
    pub fn leader(&self) -> Option<&str> {
        self.units
            .iter()
            .find(|(_, unit)| unit.leader)
            .map(|(name, _)| name.as_str())
    }

    /// Unit with the highest ordinal, compared numerically.
    #[must_use]
    pub fn highest_unit(&self) -> Option<&str> {
        self.units
            .keys()
            .max_by_key(|name| unit_ordinal(name))
            .map(String::as_str)
    }

    /// Returns true if the application and every unit report one of
    /// `accepted`.
    #[must_use]
    pub fn settled(&self, accepted: &[String]) -> bool {
        let is_accepted = |status: &str| accepted.iter().any(|a| a == status);
        is_accepted(&self.status)
            && self.units.values().all(|unit| is_accepted(&unit.workload_status))
    }

    /// Short status line for logs and timeout errors.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut line = format!("{} {}", self.name, self.status);
        for (name, unit) in &self.units {
            let _ = write!(line, ", {name} {}/{}", unit.workload_status, unit.agent_status);
        }
        line
    }
}

impl UnitInfo {
    /// Returns true once the unit has finished refreshing its workload.
    #[must_use]
    pub fn upgrade_completed(&self) -> bool {
        self.workload_status == "maintenance"
            && self.workload_message.to_lowercase().contains("upgrade completed")
            && self.agent_status == "idle"
    }
}

/// Ordinal of a unit name such as `mysql/3`.
#[must_use]
pub fn unit_ordinal(unit: &str) -> u64 {
    unit.rsplit('/')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}
