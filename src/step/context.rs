//! Per-run context handed to every step.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::registry::Registry;

/// Capacity of the status channel.
const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Progress reporting for long-running steps.
///
/// Every update is logged and, when someone subscribed, broadcast.
#[derive(Debug, Clone)]
pub struct StatusSink {
    sender: broadcast::Sender<String>,
}

impl StatusSink {
    /// Creates a sink with no subscriber.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribes to status updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Publishes a status update.
    pub fn update(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        // No receiver is not an error.
        let _ = self.sender.send(message);
    }
}

impl Default for StatusSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a step may use besides its own fields.
#[derive(Clone)]
pub struct RunContext {
    /// Cluster registry.
    pub registry: Arc<dyn Registry>,
    /// Identifier of this run, attached to log spans.
    pub run_id: Uuid,
    /// Progress sink.
    pub status: StatusSink,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("registry", &self.registry.backend_type())
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Creates a context with a fresh run id.
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            run_id: Uuid::new_v4(),
            status: StatusSink::new(),
        }
    }

    /// Replaces the status sink.
    #[must_use]
    pub fn with_status(mut self, status: StatusSink) -> Self {
        self.status = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;

    #[tokio::test]
    async fn test_status_updates_reach_subscribers() {
        let sink = StatusSink::new();
        let mut receiver = sink.subscribe();

        sink.update("Scaling mysql to 3 units");
        assert_eq!(receiver.recv().await.expect("message"), "Scaling mysql to 3 units");
    }

    #[test]
    fn test_update_without_subscriber() {
        StatusSink::default().update("nobody listens");
    }

    #[test]
    fn test_run_ids_differ() {
        let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        let a = RunContext::new(registry.clone());
        let b = RunContext::new(registry).with_status(a.status.clone());
        assert_ne!(a.run_id, b.run_id);
    }
}
