//! Bounded polling of orchestrator status.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};

use super::client::Orchestrator;
use super::types::ApplicationInfo;

/// Delay between polls and overall timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Delay between two polls.
    pub delay: Duration,
    /// Time after which the wait fails.
    pub timeout: Duration,
}

impl WaitPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(delay: Duration, timeout: Duration) -> Self {
        Self { delay, timeout }
    }

    /// Same delay, different timeout.
    #[must_use]
    pub const fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

impl From<&OrchestratorConfig> for WaitPolicy {
    fn from(config: &OrchestratorConfig) -> Self {
        Self::new(
            Duration::from_secs(config.poll_interval_secs),
            Duration::from_secs(config.wait_timeout_secs),
        )
    }
}

/// Polls `check` until it yields a value.
///
/// `check` returns the value once the condition holds, together with a
/// description of what it observed, which ends up in the timeout error.
///
/// # Errors
///
/// Returns [`OrchestratorError::Timeout`] once the policy timeout expired,
/// or the first error of `check`.
pub async fn wait_until<T, F, Fut>(
    policy: WaitPolicy,
    target: &str,
    expected: &str,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<(Option<T>, String)>> + Send,
{
    let start = Instant::now();

    loop {
        let (value, observed) = check().await?;
        if let Some(value) = value {
            debug!("{target} reached {expected}");
            return Ok(value);
        }

        if start.elapsed() >= policy.timeout {
            return Err(OrchestratorError::Timeout {
                target: target.to_string(),
                expected: expected.to_string(),
                last_observed: observed,
            }
            .into());
        }

        debug!("Waiting for {target} to reach {expected}, observed: {observed}");
        tokio::time::sleep(policy.delay).await;
    }
}

/// Waits until `application` and all of its units report one of
/// `accepted`, returning the settled application.
///
/// # Errors
///
/// Returns [`OrchestratorError::Timeout`] if the application does not
/// settle in time.
pub async fn wait_for_application_status(
    orchestrator: &dyn Orchestrator,
    application: &str,
    accepted: &[String],
    policy: WaitPolicy,
) -> Result<ApplicationInfo> {
    let expected = accepted.join("|");

    wait_until(policy, application, &expected, || async move {
        let Some(app) = orchestrator.get_application(application).await? else {
            return Ok((None, String::from("not deployed")));
        };
        let summary = app.summary();
        Ok((app.settled(accepted).then_some(app), summary))
    })
    .await
}

/// Waits until `unit` of `application` has finished refreshing its workload.
///
/// # Errors
///
/// Returns [`OrchestratorError::Timeout`] if the unit does not finish in
/// time.
pub async fn wait_for_unit_upgrade(
    orchestrator: &dyn Orchestrator,
    application: &str,
    unit: &str,
    policy: WaitPolicy,
) -> Result<()> {
    wait_until(policy, unit, "upgrade completed", || async move {
        let unit_info = orchestrator
            .get_application(application)
            .await?
            .and_then(|app| app.units.get(unit).cloned());

        Ok(unit_info.map_or_else(
            || (None, String::from("unit missing")),
            |u| {
                (
                    u.upgrade_completed().then_some(()),
                    format!("{}/{} {}", u.workload_status, u.agent_status, u.workload_message),
                )
            },
        ))
    })
    .await
}
