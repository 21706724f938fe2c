//! Registry-backed phase tracking.
//!
//! The current phase is stored under one registry key together with the
//! procedure's own data:
//!
//! ```json
//! {"state": "SCALED_UP", "original_revision": 240, "original_scale": 1,
//!  "updated_at": "...", "updated_by": "node-1-4242-1a2b3c4d"}
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ConvergeError, Result};
use crate::registry::{Registry, delete_config_if_present, generate_holder_id, update_config};

use super::phase::{Phase, PhaseRanks};

/// Persisted form of a procedure's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord<D> {
    /// Name of the last completed phase.
    pub state: String,
    /// Procedure data.
    #[serde(flatten)]
    pub data: D,
    /// When the phase was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Operator process that recorded it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

/// Tracks the current phase of one procedure.
pub struct PhaseTracker<P: Phase> {
    registry: Arc<dyn Registry>,
    key: String,
    ranks: PhaseRanks<P>,
    current: P,
    holder: String,
}

impl<P: Phase> std::fmt::Debug for PhaseTracker<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseTracker")
            .field("key", &self.key)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl<P: Phase> PhaseTracker<P> {
    /// Creates a tracker at the initial phase.
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>, key: impl Into<String>, ranks: PhaseRanks<P>) -> Self {
        Self {
            registry,
            key: key.into(),
            current: ranks.initial(),
            ranks,
            holder: generate_holder_id(),
        }
    }

    /// Registry key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current phase.
    #[must_use]
    pub const fn current(&self) -> P {
        self.current
    }

    /// Returns true if the procedure is at or past `target`.
    #[must_use]
    pub fn reached(&self, target: P) -> bool {
        self.ranks.reached(self.current, target)
    }

    /// Returns true if any progress is persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    pub async fn exists(&self) -> Result<bool> {
        Ok(self.registry.get(&self.key).await?.is_some())
    }

    /// Loads the persisted phase and data.
    ///
    /// A missing, malformed or unrecognised record starts over at the
    /// initial phase.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    pub async fn load<D: DeserializeOwned + Default>(&mut self) -> Result<D> {
        self.current = self.ranks.initial();

        let Some(raw) = self.registry.get(&self.key).await? else {
            debug!("No persisted progress under {}", self.key);
            return Ok(D::default());
        };

        let record: PhaseRecord<D> = match serde_json::from_value(raw) {
            Ok(record) => record,
            Err(e) => {
                warn!("Malformed progress under {}: {e}, starting over", self.key);
                return Ok(D::default());
            }
        };

        match self.ranks.parse(&record.state) {
            Some(phase) => self.current = phase,
            None => warn!("Unknown phase '{}' under {}, starting over", record.state, self.key),
        }
        debug!("Resuming {} from {:?}", self.key, self.current);
        Ok(record.data)
    }

    /// Records `phase` as completed together with `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if `phase` is behind the current phase or the
    /// registry cannot be written.
    pub async fn advance<D: Serialize + Clone + Sync>(&mut self, phase: P, data: &D) -> Result<()> {
        if self.ranks.rank(phase) < self.ranks.rank(self.current) {
            return Err(ConvergeError::internal(format!(
                "{} cannot move back from {} to {}",
                self.key,
                self.current.name(),
                phase.name()
            )));
        }

        let record = PhaseRecord {
            state: phase.name().to_string(),
            data: data.clone(),
            updated_at: Some(Utc::now()),
            updated_by: Some(self.holder.clone()),
        };
        update_config(self.registry.as_ref(), &self.key, &record).await?;
        self.current = phase;
        debug!("{} reached {}", self.key, phase.name());
        Ok(())
    }

    /// Deletes the persisted progress and returns to the initial phase.
    ///
    /// # Errors
    ///
    /// Returns an error on any registry failure other than a missing key.
    pub async fn clear(&mut self) -> Result<()> {
        delete_config_if_present(self.registry.as_ref(), &self.key).await?;
        self.current = self.ranks.initial();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use serde_json::json;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Rollout {
        Init,
        Drained,
        Done,
    }

    impl Phase for Rollout {
        const SEQUENCE: &'static [Self] = &[Self::Init, Self::Drained, Self::Done];

        fn name(self) -> &'static str {
            match self {
                Self::Init => "INIT",
                Self::Drained => "DRAINED",
                Self::Done => "DONE",
            }
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    struct Data {
        #[serde(default)]
        original_scale: Option<u32>,
    }

    fn tracker(registry: &Arc<MemoryRegistry>) -> PhaseTracker<Rollout> {
        PhaseTracker::new(registry.clone(), "rollout_state", PhaseRanks::build().expect("ranks"))
    }

    #[tokio::test]
    async fn test_advance_persists_and_reloads() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut first = tracker(&registry);
        let data = Data { original_scale: Some(1) };
        first.advance(Rollout::Drained, &data).await.expect("advance");

        let stored = registry.get("rollout_state").await.expect("get").expect("present");
        assert_eq!(stored["state"], json!("DRAINED"));
        assert_eq!(stored["original_scale"], json!(1));
        assert!(stored["updated_by"].is_string());

        let mut second = tracker(&registry);
        let loaded: Data = second.load().await.expect("load");
        assert_eq!(loaded, data);
        assert_eq!(second.current(), Rollout::Drained);
        assert!(second.reached(Rollout::Init));
        assert!(!second.reached(Rollout::Done));
    }

    #[tokio::test]
    async fn test_missing_record_starts_at_initial() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut t = tracker(&registry);
        let data: Data = t.load().await.expect("load");
        assert_eq!(data, Data::default());
        assert_eq!(t.current(), Rollout::Init);
        assert!(!t.exists().await.expect("exists"));
    }

    #[tokio::test]
    async fn test_unknown_phase_keeps_data() {
        let registry = Arc::new(MemoryRegistry::with_entries([(
            "rollout_state",
            json!({"state": "HALFWAY", "original_scale": 3}),
        )]));
        let mut t = tracker(&registry);
        let data: Data = t.load().await.expect("load");
        assert_eq!(t.current(), Rollout::Init);
        assert_eq!(data.original_scale, Some(3));
    }

    #[tokio::test]
    async fn test_malformed_record_starts_over() {
        let registry = Arc::new(MemoryRegistry::with_entries([("rollout_state", json!("not an object"))]));
        let mut t = tracker(&registry);
        let data: Data = t.load().await.expect("load");
        assert_eq!(data, Data::default());
        assert_eq!(t.current(), Rollout::Init);
    }

    #[tokio::test]
    async fn test_backward_transition_rejected() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut t = tracker(&registry);
        t.advance(Rollout::Done, &Data::default()).await.expect("advance");
        assert!(t.advance(Rollout::Drained, &Data::default()).await.is_err());
        assert_eq!(t.current(), Rollout::Done);
    }

    #[tokio::test]
    async fn test_clear() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut t = tracker(&registry);
        t.advance(Rollout::Drained, &Data::default()).await.expect("advance");
        t.clear().await.expect("clear");
        t.clear().await.expect("clear twice");
        assert_eq!(t.current(), Rollout::Init);
        assert!(registry.keys().await.is_empty());
        assert_eq!(t.key(), "rollout_state");
    }
}
