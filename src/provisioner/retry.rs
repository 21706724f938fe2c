//! Retry around a locked remote state.
//!
//! Only [`ProvisionerError::StateLocked`](crate::error::ProvisionerError)
//! is retried, at a fixed interval, until the deadline has passed. Every
//! other error ends the operation immediately.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::RetryConfig;
use crate::error::Result;

/// Fixed-interval retry policy bounded by a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetryPolicy {
    /// Delay between attempts.
    pub interval: Duration,
    /// No attempt starts after this much time since the first one.
    pub deadline: Duration,
}

impl Default for LockRetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            deadline: Duration::from_secs(300),
        }
    }
}

impl From<&RetryConfig> for LockRetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            interval: config.interval(),
            deadline: config.deadline(),
        }
    }
}

impl LockRetryPolicy {
    /// Runs `attempt` until it succeeds, fails with something other than a
    /// locked state, or the deadline leaves no room for another attempt.
    ///
    /// # Errors
    ///
    /// Returns the last error of `attempt`.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        let started = Instant::now();
        let mut attempts: u32 = 1;

        loop {
            match attempt().await {
                Ok(value) => {
                    if attempts > 1 {
                        info!("{operation} succeeded after {attempts} attempts");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_state_locked() => {
                    let elapsed = started.elapsed();
                    if elapsed + self.interval > self.deadline {
                        warn!(
                            "{operation}: remote state still locked after {attempts} attempts over {}s, giving up",
                            elapsed.as_secs()
                        );
                        return Err(e);
                    }

                    warn!(
                        "{operation}: remote state locked (attempt {attempts}), retrying in {}s",
                        self.interval.as_secs()
                    );
                    tokio::time::sleep(self.interval).await;
                    attempts = attempts.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
