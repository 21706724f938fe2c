//! Orchestrator trait and its CLI-backed implementation.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec, RunError};

use super::types::{ActionResult, ApplicationInfo, UnitInfo};

/// Default timeout of a single orchestrator command.
const COMMAND_TIMEOUT_SECS: u64 = 300;

/// Operations the engine needs from the application orchestrator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Reads an application, `None` if it is not deployed.
    async fn get_application(&self, application: &str) -> Result<Option<ApplicationInfo>>;

    /// Name of the leader unit of `application`.
    async fn get_leader_unit(&self, application: &str) -> Result<String>;

    /// Runs `action` on `unit` and returns its results.
    ///
    /// Fails with [`OrchestratorError::ActionFailed`] when the action does
    /// not complete or reports a `return-code` above 1.
    async fn run_action(
        &self,
        unit: &str,
        action: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<ActionResult>;

    /// Sets the unit count of `application`.
    async fn scale_application(&self, application: &str, scale: u32) -> Result<()>;

    /// Refreshes `application` to the latest revision of its channel.
    async fn refresh_application(&self, application: &str) -> Result<()>;

    /// Latest revision of `charm` published in `channel`.
    async fn latest_revision(&self, charm: &str, channel: &str) -> Result<Option<u64>>;

    /// Upgrade stack advertised by `unit`, empty when no upgrade is running.
    async fn upgrade_stack(&self, unit: &str) -> Result<Vec<Value>>;
}

/// Orchestrator driven through its command-line client.
#[derive(Clone)]
pub struct OrchestratorCli {
    binary: PathBuf,
    model: String,
    timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for OrchestratorCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorCli")
            .field("binary", &self.binary)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Deserialize)]
struct StatusDoc {
    #[serde(default)]
    applications: BTreeMap<String, ApplicationDoc>,
}

#[derive(Debug, Default, Deserialize)]
struct StatusField {
    #[serde(default)]
    current: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApplicationDoc {
    #[serde(rename = "application-status", default)]
    application_status: StatusField,
    #[serde(rename = "charm-rev")]
    charm_rev: Option<u64>,
    #[serde(rename = "charm-channel")]
    charm_channel: Option<String>,
    scale: Option<u32>,
    #[serde(default)]
    units: BTreeMap<String, UnitDoc>,
}

#[derive(Debug, Deserialize)]
struct UnitDoc {
    #[serde(rename = "workload-status", default)]
    workload_status: StatusField,
    #[serde(rename = "juju-status", default)]
    agent_status: StatusField,
    #[serde(default)]
    leader: bool,
}

#[derive(Debug, Deserialize)]
struct ActionDoc {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    results: ActionResult,
}

#[derive(Debug, Deserialize)]
struct ShowUnitDoc {
    #[serde(rename = "relation-info", default)]
    relation_info: Vec<RelationDoc>,
}

#[derive(Debug, Deserialize)]
struct RelationDoc {
    #[serde(default)]
    endpoint: String,
    #[serde(rename = "application-data", default)]
    application_data: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct InfoDoc {
    #[serde(default)]
    channels: BTreeMap<String, BTreeMap<String, Vec<ChannelRelease>>>,
}

#[derive(Debug, Deserialize)]
struct ChannelRelease {
    revision: u64,
}

impl OrchestratorCli {
    /// Creates a client for `model`.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, model: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
            timeout: Duration::from_secs(COMMAND_TIMEOUT_SECS),
            runner,
        }
    }

    /// Creates a client from the orchestrator configuration.
    #[must_use]
    pub fn from_config(config: &OrchestratorConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(&config.binary, &config.model, runner)
    }

    /// Model the client operates on.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn execute(&self, args: Vec<String>) -> Result<CommandOutput> {
        let spec = CommandSpec::new(&self.binary).args(args).timeout(self.timeout);
        debug!("Running {}", spec.display());

        self.runner.run(&spec).await.map_err(|e| match e {
            RunError::Launch { message, .. } => OrchestratorError::Launch { message }.into(),
            RunError::TimedOut(_) => OrchestratorError::CommandFailed {
                command: spec.display(),
                stderr: e.to_string(),
            }
            .into(),
        })
    }

    async fn execute_checked(&self, args: Vec<String>) -> Result<String> {
        let command = args.first().cloned().unwrap_or_default();
        let output = self.execute(args).await?;
        if !output.success() {
            return Err(OrchestratorError::CommandFailed {
                command,
                stderr: output.stderr.trim().to_string(),
            }
            .into());
        }
        Ok(output.stdout)
    }

    async fn execute_json<T: DeserializeOwned>(&self, args: Vec<String>) -> Result<T> {
        let stdout = self.execute_checked(args).await?;
        decode(&stdout)
    }

    fn model_args(&self, command: &str) -> Vec<String> {
        vec![command.to_string(), String::from("--model"), self.model.clone()]
    }
}

fn decode<T: DeserializeOwned>(stdout: &str) -> Result<T> {
    serde_json::from_str(stdout.trim()).map_err(|e| {
        OrchestratorError::InvalidResponse {
            message: e.to_string(),
        }
        .into()
    })
}

#[async_trait]
impl Orchestrator for OrchestratorCli {
    async fn get_application(&self, application: &str) -> Result<Option<ApplicationInfo>> {
        let mut args = self.model_args("status");
        args.extend([String::from("--format"), String::from("json"), application.to_string()]);
        let mut status: StatusDoc = self.execute_json(args).await?;

        let Some(doc) = status.applications.remove(application) else {
            debug!("Application {application} not deployed in model {}", self.model);
            return Ok(None);
        };

        let units: BTreeMap<String, UnitInfo> = doc
            .units
            .into_iter()
            .map(|(name, unit)| {
                (
                    name,
                    UnitInfo {
                        workload_status: unit.workload_status.current,
                        workload_message: unit.workload_status.message,
                        agent_status: unit.agent_status.current,
                        leader: unit.leader,
                    },
                )
            })
            .collect();

        Ok(Some(ApplicationInfo {
            name: application.to_string(),
            status: doc.application_status.current,
            charm_revision: doc.charm_rev,
            charm_channel: doc.charm_channel,
            scale: doc
                .scale
                .unwrap_or_else(|| u32::try_from(units.len()).unwrap_or(u32::MAX)),
            units,
        }))
    }

    async fn get_leader_unit(&self, application: &str) -> Result<String> {
        let Some(app) = self.get_application(application).await? else {
            return Err(OrchestratorError::ApplicationNotFound {
                application: application.to_string(),
                model: self.model.clone(),
            }
            .into());
        };

        app.leader().map(ToString::to_string).ok_or_else(|| {
            OrchestratorError::LeaderNotFound {
                application: application.to_string(),
                model: self.model.clone(),
            }
            .into()
        })
    }

    async fn run_action(
        &self,
        unit: &str,
        action: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<ActionResult> {
        let mut args = self.model_args("run");
        args.extend([
            String::from("--format"),
            String::from("json"),
            unit.to_string(),
            action.to_string(),
        ]);
        args.extend(params.iter().map(|(k, v)| format!("{k}={v}")));

        info!("Running action {action} on {unit}");
        let output = self.execute(args).await?;
        let action_failed = |message: String| OrchestratorError::ActionFailed {
            unit: unit.to_string(),
            action: action.to_string(),
            message,
        };

        // A failed action still prints its document, so decode before
        // looking at the exit code.
        let mut docs: BTreeMap<String, ActionDoc> = match decode(&output.stdout) {
            Ok(docs) => docs,
            Err(_) if !output.success() => {
                return Err(action_failed(output.stderr.trim().to_string()).into());
            }
            Err(e) => return Err(e),
        };
        let Some(doc) = docs.remove(unit) else {
            return Err(OrchestratorError::InvalidResponse {
                message: format!("no result for {unit} in action output"),
            }
            .into());
        };

        if doc.status != "completed" {
            let message = doc.message.unwrap_or_else(|| format!("action status {}", doc.status));
            return Err(action_failed(message).into());
        }

        let code = doc.results.get("return-code").and_then(Value::as_i64).unwrap_or(0);
        if code > 1 {
            return Err(action_failed(format!("return-code {code}")).into());
        }

        Ok(doc.results)
    }

    async fn scale_application(&self, application: &str, scale: u32) -> Result<()> {
        let mut args = self.model_args("scale-application");
        args.extend([application.to_string(), scale.to_string()]);
        info!("Scaling {application} to {scale} units");
        self.execute_checked(args).await?;
        Ok(())
    }

    async fn refresh_application(&self, application: &str) -> Result<()> {
        let mut args = self.model_args("refresh");
        args.push(application.to_string());
        info!("Refreshing {application}");
        self.execute_checked(args).await?;
        Ok(())
    }

    async fn latest_revision(&self, charm: &str, channel: &str) -> Result<Option<u64>> {
        let args = vec![
            String::from("info"),
            String::from("--format"),
            String::from("json"),
            String::from("--channel"),
            channel.to_string(),
            charm.to_string(),
        ];
        let info: InfoDoc = self.execute_json(args).await?;

        let (track, risk) = channel.split_once('/').unwrap_or((channel, "stable"));
        let revision = info
            .channels
            .get(track)
            .and_then(|risks| risks.get(risk))
            .and_then(|releases| releases.iter().map(|r| r.revision).max());
        debug!("Latest revision of {charm} in {channel}: {revision:?}");
        Ok(revision)
    }

    async fn upgrade_stack(&self, unit: &str) -> Result<Vec<Value>> {
        let mut args = self.model_args("show-unit");
        args.extend([String::from("--format"), String::from("json"), unit.to_string()]);
        let mut docs: BTreeMap<String, ShowUnitDoc> = self.execute_json(args).await?;

        let Some(doc) = docs.remove(unit) else {
            return Ok(Vec::new());
        };
        let Some(raw) = doc
            .relation_info
            .iter()
            .find(|relation| relation.endpoint == "upgrade")
            .and_then(|relation| relation.application_data.get("upgrade-stack"))
            .and_then(Value::as_str)
        else {
            return Ok(Vec::new());
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Vec<Value>>(raw) {
            Ok(stack) => Ok(stack),
            Err(e) => {
                warn!("Failed to parse upgrade stack of {unit} ({raw}): {e}");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::ScriptedRunner;
    use crate::runner::MockCommandRunner;
    use serde_json::json;

    const STATUS: &str = r#"{
        "model": {"name": "openstack"},
        "applications": {
            "mysql": {
                "charm-rev": 240,
                "charm-channel": "8.0/stable",
                "scale": 3,
                "application-status": {"current": "active", "message": ""},
                "units": {
                    "mysql/0": {
                        "workload-status": {"current": "active", "message": "Primary"},
                        "juju-status": {"current": "idle"},
                        "leader": true
                    },
                    "mysql/1": {
                        "workload-status": {"current": "active"},
                        "juju-status": {"current": "idle"}
                    }
                }
            }
        }
    }"#;

    fn client(runner: &Arc<ScriptedRunner>) -> OrchestratorCli {
        OrchestratorCli::new("juju", "openstack", runner.clone())
    }

    #[tokio::test]
    async fn test_get_application_parses_status() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok(STATUS);

        let app = client(&runner)
            .get_application("mysql")
            .await
            .expect("status")
            .expect("deployed");

        assert_eq!(app.status, "active");
        assert_eq!(app.charm_revision, Some(240));
        assert_eq!(app.charm_channel.as_deref(), Some("8.0/stable"));
        assert_eq!(app.scale, 3);
        assert_eq!(app.leader(), Some("mysql/0"));
        assert_eq!(app.units["mysql/0"].workload_message, "Primary");
        assert_eq!(
            runner.args()[0],
            vec!["status", "--model", "openstack", "--format", "json", "mysql"]
        );
    }

    #[tokio::test]
    async fn test_missing_application_is_none() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok(r#"{"applications": {}}"#);
        runner.push_ok(r#"{"applications": {}}"#);
        let cli = client(&runner);

        assert!(cli.get_application("mysql").await.expect("status").is_none());
        let err = cli.get_leader_unit("mysql").await.expect_err("missing");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_run_action_return_codes() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok(r#"{"mysql/0": {"status": "completed", "results": {"return-code": 1, "Code": "0"}}}"#);
        runner.push_ok(r#"{"mysql/0": {"status": "completed", "results": {"return-code": 2}}}"#);
        runner.push_failure(1, "ERROR action not defined");
        let cli = client(&runner);
        let params = BTreeMap::new();

        let results = cli
            .run_action("mysql/0", "pre-upgrade-check", &params)
            .await
            .expect("return-code 1 is not a failure");
        assert_eq!(results.get("Code"), Some(&json!("0")));

        let err = cli
            .run_action("mysql/0", "pre-upgrade-check", &params)
            .await
            .expect_err("return-code 2");
        assert!(err.to_string().contains("return-code 2"));

        let err = cli
            .run_action("mysql/0", "resume-upgrade", &params)
            .await
            .expect_err("command failure");
        assert!(err.to_string().contains("action not defined"));
    }

    #[tokio::test]
    async fn test_run_action_failed_status() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push(Ok(CommandOutput {
            code: Some(1),
            stdout: String::from(r#"{"mysql/0": {"status": "failed", "message": "cluster not healthy"}}"#),
            stderr: String::new(),
        }));
        let mut params = BTreeMap::new();
        params.insert(String::from("force"), String::from("true"));

        let err = client(&runner)
            .run_action("mysql/0", "pre-upgrade-check", &params)
            .await
            .expect_err("failed");
        assert!(err.to_string().contains("cluster not healthy"));
        assert_eq!(runner.args()[0].last().map(String::as_str), Some("force=true"));
    }

    #[tokio::test]
    async fn test_latest_revision() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok(
            r#"{"name": "mysql-k8s", "channels": {"8.0": {"stable": [{"revision": 255}, {"revision": 254}], "edge": [{"revision": 260}]}}}"#,
        );

        let revision = client(&runner)
            .latest_revision("mysql-k8s", "8.0/stable")
            .await
            .expect("info");
        assert_eq!(revision, Some(255));
    }

    #[tokio::test]
    async fn test_upgrade_stack() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok(
            r#"{"mysql/0": {"relation-info": [
                {"endpoint": "database-peers", "application-data": {}},
                {"endpoint": "upgrade", "application-data": {"upgrade-stack": "[0, 1, 2]"}}
            ]}}"#,
        );
        runner.push_ok(r#"{"mysql/0": {"relation-info": [{"endpoint": "upgrade", "application-data": {}}]}}"#);
        let cli = client(&runner);

        assert_eq!(cli.upgrade_stack("mysql/0").await.expect("show"), vec![json!(0), json!(1), json!(2)]);
        assert!(cli.upgrade_stack("mysql/0").await.expect("show").is_empty());
    }

    #[tokio::test]
    async fn test_scale_and_refresh_commands() {
        let runner = Arc::new(ScriptedRunner::new());
        let cli = client(&runner);

        cli.scale_application("mysql", 3).await.expect("scale");
        cli.refresh_application("mysql").await.expect("refresh");

        assert_eq!(
            runner.args(),
            vec![
                vec!["scale-application", "--model", "openstack", "mysql", "3"],
                vec!["refresh", "--model", "openstack", "mysql"],
            ]
        );
    }

    #[tokio::test]
    async fn test_runner_failures_map_to_orchestrator_errors() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.args.first().map(String::as_str) == Some("refresh"))
            .times(1)
            .returning(|_| Err(RunError::TimedOut(Duration::from_secs(COMMAND_TIMEOUT_SECS))));
        runner
            .expect_run()
            .withf(|spec| spec.args.first().map(String::as_str) == Some("scale-application"))
            .times(1)
            .returning(|spec| {
                Err(RunError::Launch {
                    program: spec.program.display().to_string(),
                    message: String::from("No such file or directory"),
                })
            });
        let cli = OrchestratorCli::new("juju", "openstack", Arc::new(runner));

        let err = cli.refresh_application("mysql").await.expect_err("timeout");
        assert!(err.to_string().contains("timed out"));

        let err = cli.scale_application("mysql", 3).await.expect_err("launch");
        assert!(err.to_string().contains("No such file or directory"));
    }
}
