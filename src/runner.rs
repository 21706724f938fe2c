//! Subprocess execution.
//!
//! `CommandRunner` is the seam both CLI adapters (provisioner and
//! orchestrator) go through. `TokioCommandRunner` spawns real processes and
//! kills them when their timeout expires.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, trace};

/// A command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Environment added on top of the inherited one.
    pub env: BTreeMap<String, String>,
    /// Time after which the process is killed.
    pub timeout: Duration,
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal.
    pub code: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

/// Failure to obtain a command's output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunError {
    /// The process could not be started or awaited.
    #[error("failed to run {program}: {message}")]
    Launch {
        /// Program that failed.
        program: String,
        /// OS error text.
        message: String,
    },

    /// The process was killed after its timeout.
    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

/// Trait for executing commands.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs a command to completion or timeout.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunError>;
}

impl CommandSpec {
    /// Creates a spec with no arguments and a ten minute timeout.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            timeout: Duration::from_secs(600),
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Sets the environment additions.
    #[must_use]
    pub fn envs(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command line for log messages.
    #[must_use]
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl CommandOutput {
    /// Returns true if the process exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Runner spawning real processes on the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCommandRunner;

impl TokioCommandRunner {
    /// Creates a new runner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunError> {
        debug!("Running: {}", spec.display());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let launch_error = |e: std::io::Error| RunError::Launch {
            program: spec.program.display().to_string(),
            message: e.to_string(),
        };

        let child = command.spawn().map_err(launch_error)?;

        // Dropping the child on timeout kills it.
        let output = tokio::time::timeout(spec.timeout, child.wait_with_output())
            .await
            .map_err(|_| RunError::TimedOut(spec.timeout))?
            .map_err(launch_error)?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        trace!("{} exited with {:?}", spec.display(), result.code);
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted runner recording every command it receives.

    use super::{CommandOutput, CommandRunner, CommandSpec, RunError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns queued responses in order; an empty queue yields success.
    #[derive(Debug, Default)]
    pub struct ScriptedRunner {
        responses: Mutex<VecDeque<Result<CommandOutput, RunError>>>,
        commands: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, response: Result<CommandOutput, RunError>) -> &Self {
            self.responses.lock().expect("lock").push_back(response);
            self
        }

        pub fn push_ok(&self, stdout: &str) -> &Self {
            self.push(Ok(CommandOutput {
                code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            }))
        }

        pub fn push_failure(&self, code: i32, stderr: &str) -> &Self {
            self.push(Ok(CommandOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            }))
        }

        pub fn commands(&self) -> Vec<CommandSpec> {
            self.commands.lock().expect("lock").clone()
        }

        pub fn args(&self) -> Vec<Vec<String>> {
            self.commands().into_iter().map(|c| c.args).collect()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunError> {
            self.commands.lock().expect("lock").push(spec.clone());
            self.responses
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Ok(CommandOutput {
                    code: Some(0),
                    ..CommandOutput::default()
                }))
        }
    }
}
