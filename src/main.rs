//! Converge CLI entrypoint.
//!
//! This is the main entrypoint for the converge command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use stack_converge::cli::{
    Cli, Commands, LogFormat, OutputFormatter, StateCommands, UpgradeCommands, parse_overrides,
};
use stack_converge::config::{ConfigParser, ConfigValidator, EngineConfig, find_config_file};
use stack_converge::deployment::Deployment;
use stack_converge::error::{ConvergeError, RegistryError, Result};
use stack_converge::outcome::Outcome;
use stack_converge::reconciler::VariableReconciler;
use stack_converge::step::{PlanRunner, RunContext, Step};
use stack_converge::steps::{
    DeployOptions, InitProvisionerStep, database_upgrade_plan, deploy_plan, destroy_plan,
};

use clap::Parser;
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_format);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool, format: LogFormat) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }
}

/// Main async entry point. Returns whether the command succeeded.
async fn run(cli: Cli) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Init { plan } => {
            let deployment = load_deployment(config_path)?;
            let steps: Vec<Box<dyn Step>> = vec![Box::new(InitProvisionerStep::new(deployment.provisioner(&plan)?))];
            run_plan(&deployment, &format!("init {plan}"), steps, &formatter).await
        }
        Commands::Deploy {
            plan,
            application,
            overrides,
            components,
            refresh,
        } => {
            let deployment = load_deployment(config_path)?;
            let options = DeployOptions {
                application,
                overrides: parse_overrides(&overrides)?,
                components: (!components.is_empty()).then_some(components),
                refresh,
            };
            let steps = deploy_plan(&deployment, &plan, options)?;
            run_plan(&deployment, &format!("deploy {plan}"), steps, &formatter).await
        }
        Commands::Destroy { plan, yes } => {
            let deployment = load_deployment(config_path)?;
            let steps = destroy_plan(&deployment, &plan)?;
            if !yes && !confirm(&format!("This destroys every resource of plan {plan}. Type '{plan}' to confirm: "), &plan)? {
                eprintln!("Destruction cancelled.");
                return Ok(true);
            }
            run_plan(&deployment, &format!("destroy {plan}"), steps, &formatter).await
        }
        Commands::Output { plan } => {
            let deployment = load_deployment(config_path)?;
            let outputs = deployment.provisioner(&plan)?.output().await?;
            emit(&formatter.format_values(&format!("Outputs of {plan}"), &outputs))?;
            Ok(true)
        }
        Commands::Vars { plan } => {
            let deployment = load_deployment(config_path)?;
            let key = &deployment.plan(&plan)?.config_key;
            let variables = VariableReconciler::new(deployment.registry()).persisted(key).await?;
            emit(&formatter.format_variables(key, &variables))?;
            Ok(true)
        }
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
        Commands::Upgrade { command } => match command {
            UpgradeCommands::Database { reset_state } => {
                let deployment = load_deployment(config_path)?;
                let steps = database_upgrade_plan(&deployment, reset_state)?;
                run_plan(&deployment, "upgrade database", steps, &formatter).await
            }
        },
    }
}

/// Validate configuration.
fn cmd_validate(config_path: Option<&Path>, show_warnings: bool, formatter: &OutputFormatter) -> Result<bool> {
    let (parser, config) = load_config(config_path)?;
    let mut result = ConfigValidator::new().report(&config);

    if let Err(e) = parser.load_manifest(&config) {
        result.warnings.push(format!("manifest: {e}"));
    }

    emit(&formatter.format_validation(&result, show_warnings))?;
    if result.is_valid() {
        eprintln!("\nConfiguration summary:");
        eprintln!("  Registry: {:?}", config.registry.backend);
        eprintln!("  Model: {}", config.orchestrator.model);
        eprintln!("  Plans: {}", config.plans.len());
    }
    Ok(result.is_valid())
}

/// State management commands.
async fn cmd_state(config_path: Option<&Path>, command: StateCommands, formatter: &OutputFormatter) -> Result<bool> {
    let deployment = load_deployment(config_path)?;
    let retry = deployment.retry_policy();

    match command {
        StateCommands::List { plan } => {
            let resources = deployment.provisioner(&plan)?.state_list().await?;
            emit(&formatter.format_resources(&plan, &resources))?;
        }
        StateCommands::Rm { plan, address } => {
            let provisioner = deployment.provisioner(&plan)?;
            retry
                .run(&format!("state rm {address}"), || provisioner.state_rm(&address))
                .await?;
            emit(&formatter.format_outcome(&Outcome::completed().with_message(format!("removed {address}"))))?;
        }
        StateCommands::Sync { plan } => {
            let provisioner = deployment.provisioner(&plan)?;
            retry.run(&format!("sync {plan}"), || provisioner.sync()).await?;
            emit(&formatter.format_outcome(&Outcome::completed().with_message(format!("state of {plan} refreshed"))))?;
        }
        StateCommands::Pull { plan } => {
            let state = deployment.provisioner(&plan)?.pull_state().await?;
            emit(&serde_json::to_string_pretty(&state).unwrap_or_default())?;
        }
        StateCommands::Unlock { plan, older_than, yes } => {
            deployment.plan(&plan)?;
            let registry = deployment.http_registry().ok_or_else(|| {
                ConvergeError::Registry(RegistryError::Unsupported {
                    operation: String::from("state unlock"),
                    backend: deployment.registry().backend_type().to_string(),
                })
            })?;

            let lock = registry.provisioner_lock(&plan).await?;
            let age = lock.as_ref().map(|l| l.age_secs(chrono::Utc::now()));
            emit(&formatter.format_lock(&plan, lock.as_ref(), age))?;

            let Some(lock) = lock else {
                return Ok(true);
            };
            if age.unwrap_or_default() < older_than {
                info!("Lock on {plan} is younger than {older_than}s, keeping it");
                return Ok(true);
            }
            if !yes && !confirm(&format!("Release lock {} on plan {plan}? Type 'unlock' to confirm: ", lock.id), "unlock")? {
                eprintln!("Unlock cancelled.");
                return Ok(true);
            }
            registry.unlock_provisioner_plan(&plan, &lock).await?;
            emit(&formatter.format_outcome(&Outcome::completed().with_message(format!("lock on {plan} released"))))?;
        }
    }

    Ok(true)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Runs a plan, rendering progress and the final report.
async fn run_plan(
    deployment: &Deployment,
    name: &str,
    steps: Vec<Box<dyn Step>>,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let ctx = RunContext::new(deployment.registry());
    let mut progress = ctx.status.subscribe();
    let renderer = tokio::spawn(async move {
        loop {
            match progress.recv().await {
                Ok(line) => eprintln!("{} {line}", "»".cyan()),
                Err(RecvError::Lagged(missed)) => debug!("Missed {missed} progress update(s)"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let report = PlanRunner::new(name).run(steps, &ctx).await;
    drop(ctx);
    let _ = renderer.await;

    emit(&formatter.format_report(&report))?;
    Ok(report.success())
}

/// Writes command output to stdout.
fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", text.trim_end())?;
    Ok(())
}

/// Asks for a confirmation word on stdin.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim() == expected)
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.to_path_buf()))
}

/// Loads the configuration and the parser bound to its directory.
fn load_config(config_path: Option<&Path>) -> Result<(ConfigParser, EngineConfig)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")));
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    Ok((parser, config))
}

/// Loads and validates the configuration, then builds the deployment.
fn load_deployment(config_path: Option<&Path>) -> Result<Deployment> {
    let (parser, config) = load_config(config_path)?;
    ConfigValidator::new().validate(&config)?;
    Deployment::from_config(config, &parser)
}
