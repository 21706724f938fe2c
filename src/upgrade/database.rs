//! Resumable in-channel refresh of the database application.
//!
//! The database runs a rolling upgrade driven by its own charm: the
//! application is scaled up to keep quorum, a pre-upgrade check prepares the
//! cluster, the highest unit is refreshed first, and `resume-upgrade` lets the
//! remaining units follow. Each completed phase is persisted, so an
//! interrupted run resumes where it stopped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{DatabaseUpgradeConfig, Manifest};
use crate::error::{ConvergeError, OrchestratorError, Result, UpgradeError};
use crate::orchestrator::{
    Orchestrator, WaitPolicy, wait_for_application_status, wait_for_unit_upgrade,
};
use crate::outcome::Outcome;
use crate::step::{RunContext, Step};

use super::phase::{Phase, PhaseRanks};
use super::tracker::PhaseTracker;

const RETRY_HINT: &str = "Check the application status and re-run `converge upgrade database` to retry the upgrade.";
const RESET_HINT: &str = "Run `converge upgrade database --reset-state` to start a fresh upgrade.";

/// Phases of the database upgrade, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabasePhase {
    /// Nothing done yet.
    Init,
    /// Revision and scale before the upgrade are known.
    OriginalStateRecorded,
    /// Extra unit added.
    ScaledUp,
    /// `pre-upgrade-check` passed on the leader.
    PrecheckDone,
    /// Highest unit refreshed.
    PrimaryUnitUpgraded,
    /// `resume-upgrade` issued.
    UpgradeResumed,
    /// Every unit back to active.
    UnitsSettled,
    /// Original scale restored.
    ScaledBack,
}

impl Phase for DatabasePhase {
    const SEQUENCE: &'static [Self] = &[
        Self::Init,
        Self::OriginalStateRecorded,
        Self::ScaledUp,
        Self::PrecheckDone,
        Self::PrimaryUnitUpgraded,
        Self::UpgradeResumed,
        Self::UnitsSettled,
        Self::ScaledBack,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::OriginalStateRecorded => "ORIGINAL_STATE_RECORDED",
            Self::ScaledUp => "SCALED_UP",
            Self::PrecheckDone => "PRECHECK_DONE",
            Self::PrimaryUnitUpgraded => "PRIMARY_UNIT_UPGRADED",
            Self::UpgradeResumed => "UPGRADE_RESUMED",
            Self::UnitsSettled => "UNITS_SETTLED",
            Self::ScaledBack => "SCALED_BACK",
        }
    }
}

/// Data persisted alongside the phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseUpgradeData {
    /// Revision deployed before the upgrade.
    #[serde(default)]
    pub original_revision: Option<u64>,
    /// Unit count before the upgrade.
    #[serde(default)]
    pub original_scale: Option<u32>,
}

/// Unit count used during the upgrade: the next odd number above
/// `original`.
#[must_use]
pub const fn target_scale(original: u32) -> u32 {
    let target = original.saturating_add(1);
    if target % 2 == 0 {
        target.saturating_add(1)
    } else {
        target
    }
}

fn phase_error(phase: DatabasePhase, reason: impl Into<String>, remediation: impl Into<String>) -> ConvergeError {
    UpgradeError::new(phase.name(), reason, remediation).into()
}

/// Step refreshing the database application within its channel.
pub struct DatabaseUpgradeStep {
    orchestrator: Arc<dyn Orchestrator>,
    manifest: Arc<Manifest>,
    settings: DatabaseUpgradeConfig,
    poll_interval: Duration,
    accepted: Vec<String>,
    ranks: PhaseRanks<DatabasePhase>,
    data: DatabaseUpgradeData,
    description: String,
}

impl std::fmt::Debug for DatabaseUpgradeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseUpgradeStep")
            .field("application", &self.settings.application)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

impl DatabaseUpgradeStep {
    /// Creates the step.
    ///
    /// # Errors
    ///
    /// Returns an error if the phase table cannot be built.
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        manifest: Arc<Manifest>,
        settings: DatabaseUpgradeConfig,
        poll_interval: Duration,
    ) -> Result<Self> {
        let ranks = PhaseRanks::build()
            .ok_or_else(|| ConvergeError::internal("database upgrade phases are not unique"))?;
        let description = format!(
            "Refreshing {} application to latest in-channel revision",
            settings.application
        );
        Ok(Self {
            orchestrator,
            manifest,
            settings,
            poll_interval,
            accepted: vec![String::from("active")],
            ranks,
            data: DatabaseUpgradeData::default(),
            description,
        })
    }

    fn tracker(&self, ctx: &RunContext) -> PhaseTracker<DatabasePhase> {
        PhaseTracker::new(ctx.registry.clone(), &self.settings.state_key, self.ranks.clone())
    }

    fn wait_policy(&self, timeout_secs: u64) -> WaitPolicy {
        WaitPolicy::new(self.poll_interval, Duration::from_secs(timeout_secs))
    }

    fn app(&self) -> &str {
        &self.settings.application
    }

    async fn skip_check(&self, ctx: &RunContext) -> Result<Outcome> {
        let app_name = self.app();
        let Some(app) = self.orchestrator.get_application(app_name).await? else {
            return Ok(Outcome::skipped().with_message(format!(
                "{app_name} application has not been deployed yet"
            )));
        };

        let component = &self.settings.component;
        let Some(manifest) = self.manifest.component(component) else {
            let message = format!("{component} not present in manifest, skipping database upgrade");
            debug!("{message}");
            return Ok(Outcome::skipped().with_message(message));
        };

        if manifest.revision.is_some() {
            let message = format!("{component} revision pinned in manifest, handled by the provisioner");
            debug!("{message}");
            return Ok(Outcome::skipped().with_message(message));
        }

        let deployed_track = app
            .charm_channel
            .as_deref()
            .and_then(|c| c.split('/').next())
            .unwrap_or("");
        let manifest_track = manifest.channel_track().unwrap_or("");
        if deployed_track != manifest_track {
            let message = format!(
                "{component} channel track differs between manifest and deployment: {manifest_track} vs {deployed_track}"
            );
            debug!("{message}");
            return Ok(Outcome::skipped().with_message(message));
        }

        let Some(channel) = manifest.channel.as_deref().or(app.charm_channel.as_deref()) else {
            return Ok(Outcome::skipped().with_message(format!("{component} has no channel to refresh from")));
        };
        let Some(latest) = self.orchestrator.latest_revision(component, channel).await? else {
            return Ok(Outcome::skipped().with_message(format!("no {component} revision published in {channel}")));
        };

        let leader = match self.orchestrator.get_leader_unit(app_name).await {
            Ok(leader) => leader,
            Err(ConvergeError::Orchestrator(OrchestratorError::LeaderNotFound { .. })) => {
                let message = format!("Unable to determine leader unit for {app_name}");
                debug!("{message}");
                return Ok(Outcome::skipped().with_message(message));
            }
            Err(e) => return Err(e),
        };

        let stack = self.orchestrator.upgrade_stack(&leader).await?;
        if app.charm_revision == Some(latest) && stack.is_empty() {
            let message = format!("{component} already at latest revision {latest}");
            debug!("{message}");
            return Ok(Outcome::skipped().with_message(message));
        }

        if !stack.is_empty() && !self.tracker(ctx).exists().await? {
            let message = format!(
                "Detected {component} upgrade in progress with no persisted state. It was likely \
                 started outside this tool; complete or roll back the in-progress upgrade manually"
            );
            warn!("{message}");
            return Ok(Outcome::skipped().with_message(message));
        }

        Ok(Outcome::completed())
    }

    async fn scale_and_wait(&self, units: u32) -> Result<()> {
        self.orchestrator.scale_application(self.app(), units).await?;
        let policy = self.wait_policy(self.settings.scale_timeout_secs);
        wait_for_application_status(self.orchestrator.as_ref(), self.app(), &self.accepted, policy).await?;
        Ok(())
    }

    async fn record_original_state(&mut self, tracker: &mut PhaseTracker<DatabasePhase>) -> Result<()> {
        let phase = DatabasePhase::OriginalStateRecorded;
        if tracker.reached(phase) {
            return Ok(());
        }

        let app = self
            .orchestrator
            .get_application(self.app())
            .await?
            .ok_or_else(|| phase_error(phase, format!("{} is not deployed", self.app()), RETRY_HINT))?;
        self.data.original_revision = app.charm_revision;
        self.data.original_scale = Some(app.scale);
        debug!(
            "Recorded original {} revision {:?}, scale {}",
            self.app(),
            app.charm_revision,
            app.scale
        );
        tracker.advance(phase, &self.data).await
    }

    async fn scale_up(&mut self, tracker: &mut PhaseTracker<DatabasePhase>, ctx: &RunContext) -> Result<()> {
        let phase = DatabasePhase::ScaledUp;
        if tracker.reached(phase) {
            return Ok(());
        }

        let Some(original) = self.data.original_scale else {
            return Err(phase_error(
                phase,
                format!("original {} scale was not recorded before scale-up", self.app()),
                RESET_HINT,
            ));
        };
        let target = target_scale(original);
        let app = self.app().to_string();

        ctx.status.update(format!("Preparing {app} for upgrade, scaling to {target} units"));
        match self.scale_and_wait(target).await {
            Ok(()) => tracker.advance(phase, &self.data).await,
            Err(e) if e.is_timeout() => Err(phase_error(
                phase,
                format!("timed out waiting for {app} to become active after scaling to {target} units: {e}"),
                RETRY_HINT,
            )),
            Err(e) => Err(phase_error(
                phase,
                format!("failed to scale {app} to {target} units: {e}"),
                RETRY_HINT,
            )),
        }
    }

    async fn run_leader_action(&self, phase: DatabasePhase, action: &str) -> Result<()> {
        let app = self.app();
        let leader = match self.orchestrator.get_leader_unit(app).await {
            Ok(leader) => leader,
            Err(e) => {
                return Err(phase_error(
                    phase,
                    format!("unable to determine leader unit of {app} for {action}: {e}"),
                    RETRY_HINT,
                ));
            }
        };

        self.orchestrator
            .run_action(&leader, action, &BTreeMap::new())
            .await
            .map(|_| ())
            .map_err(|e| phase_error(phase, format!("{action} failed on {leader}: {e}"), RETRY_HINT))
    }

    async fn precheck(&mut self, tracker: &mut PhaseTracker<DatabasePhase>, ctx: &RunContext) -> Result<()> {
        let phase = DatabasePhase::PrecheckDone;
        if tracker.reached(phase) {
            return Ok(());
        }

        ctx.status.update(format!("Running pre-upgrade check on {} leader", self.app()));
        self.run_leader_action(phase, "pre-upgrade-check").await?;
        tracker.advance(phase, &self.data).await
    }

    async fn upgrade_primary_unit(
        &mut self,
        tracker: &mut PhaseTracker<DatabasePhase>,
        ctx: &RunContext,
    ) -> Result<()> {
        let phase = DatabasePhase::PrimaryUnitUpgraded;
        if tracker.reached(phase) {
            return Ok(());
        }

        let app = self.app().to_string();
        let unit = self
            .orchestrator
            .get_application(&app)
            .await?
            .and_then(|info| info.highest_unit().map(ToString::to_string))
            .ok_or_else(|| phase_error(phase, format!("{app} has no units to refresh"), RETRY_HINT))?;

        ctx.status.update(format!("Refreshing {app}, waiting for {unit} to complete upgrade"));
        if let Err(e) = self.orchestrator.refresh_application(&app).await {
            return Err(phase_error(phase, format!("refresh of {app} failed: {e}"), RETRY_HINT));
        }

        let policy = self.wait_policy(self.settings.primary_unit_timeout_secs);
        match wait_for_unit_upgrade(self.orchestrator.as_ref(), &app, &unit, policy).await {
            Ok(()) => tracker.advance(phase, &self.data).await,
            Err(e) if e.is_timeout() => Err(phase_error(
                phase,
                format!("timed out waiting for {unit} to complete upgrade: {e}"),
                RETRY_HINT,
            )),
            Err(e) => Err(phase_error(phase, format!("waiting for {unit} failed: {e}"), RETRY_HINT)),
        }
    }

    async fn resume_upgrade(&mut self, tracker: &mut PhaseTracker<DatabasePhase>, ctx: &RunContext) -> Result<()> {
        let phase = DatabasePhase::UpgradeResumed;
        if tracker.reached(phase) {
            return Ok(());
        }

        ctx.status.update(format!("Running resume-upgrade on {} leader", self.app()));
        self.run_leader_action(phase, "resume-upgrade").await?;
        tracker.advance(phase, &self.data).await
    }

    async fn wait_units_settled(
        &mut self,
        tracker: &mut PhaseTracker<DatabasePhase>,
        ctx: &RunContext,
    ) -> Result<()> {
        let phase = DatabasePhase::UnitsSettled;
        if tracker.reached(phase) {
            return Ok(());
        }

        let app = self.app().to_string();
        ctx.status.update(format!("Waiting for {app} units to complete upgrade and settle"));
        let policy = self.wait_policy(self.settings.settle_timeout_secs);
        match wait_for_application_status(self.orchestrator.as_ref(), &app, &self.accepted, policy).await {
            Ok(_) => tracker.advance(phase, &self.data).await,
            Err(e) => Err(phase_error(
                phase,
                format!("timed out waiting for {app} units to settle: {e}"),
                self.rollback_hint(),
            )),
        }
    }

    fn rollback_hint(&self) -> String {
        let app = self.app();
        let revision = self
            .data
            .original_revision
            .map_or_else(|| String::from("<previous-revision>"), |r| r.to_string());
        [
            format!("Consider rolling back to revision {revision}:"),
            format!("  1. Run `juju run {app}/leader pre-upgrade-check` to configure the rollback"),
            format!("  2. Run `juju refresh --revision {revision} {app}` to start the rollback"),
            format!("  3. Run `juju run {app}/leader resume-upgrade` to resume the rollback"),
        ]
        .join("\n")
    }

    async fn scale_back(&mut self, tracker: &mut PhaseTracker<DatabasePhase>, ctx: &RunContext) -> Result<()> {
        let phase = DatabasePhase::ScaledBack;
        if tracker.reached(phase) {
            return Ok(());
        }

        let app = self.app().to_string();
        let Some(original) = self.data.original_scale else {
            let message = format!("{app} scale-back skipped: original scale is unknown");
            warn!("{message}");
            ctx.status.update(message);
            return Ok(());
        };

        let expected = target_scale(original);
        let current = self.orchestrator.get_application(&app).await?.map(|info| info.scale);
        if current != Some(expected) {
            let message = format!(
                "{app} scale-back skipped: current scale is {}, expected {expected}",
                current.map_or_else(|| String::from("unknown"), |s| s.to_string())
            );
            warn!("{message}");
            ctx.status.update(message);
            return Ok(());
        }

        ctx.status.update(format!("{app} units upgraded, scaling back to {original} units"));
        match self.scale_and_wait(original).await {
            Ok(()) => tracker.advance(phase, &self.data).await,
            Err(e) => {
                warn!("Upgrade completed but scale-back of {app} to {original} units failed: {e}");
                Ok(())
            }
        }
    }

    async fn drive(&mut self, tracker: &mut PhaseTracker<DatabasePhase>, ctx: &RunContext) -> Result<()> {
        self.record_original_state(tracker).await?;
        self.scale_up(tracker, ctx).await?;
        self.precheck(tracker, ctx).await?;
        self.upgrade_primary_unit(tracker, ctx).await?;
        self.resume_upgrade(tracker, ctx).await?;
        self.wait_units_settled(tracker, ctx).await?;
        self.scale_back(tracker, ctx).await
    }
}

#[async_trait]
impl Step for DatabaseUpgradeStep {
    fn name(&self) -> &str {
        "Database upgrade"
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn is_skip(&mut self, ctx: &RunContext) -> Outcome {
        match self.skip_check(ctx).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::from_error(&e),
        }
    }

    async fn run(&mut self, ctx: &RunContext) -> Outcome {
        let mut tracker = self.tracker(ctx);
        self.data = match tracker.load().await {
            Ok(data) => data,
            Err(e) => return Outcome::from_error(&e),
        };
        info!("Database upgrade starting from {}", tracker.current().name());

        if let Err(e) = self.drive(&mut tracker, ctx).await {
            return Outcome::from_error(&e);
        }

        if let Err(e) = tracker.clear().await {
            return Outcome::from_error(&e);
        }
        self.data = DatabaseUpgradeData::default();
        Outcome::completed().with_message(format!("{} upgrade completed successfully", self.app()))
    }
}
