//! Implementation of the `harbour deploy` command.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, ValueEnum};
use harbour_control::{
    load_sdk_config, ControlConfig, ControlError, DeployReport, DeployRequest, EcsControlPlane,
    Orchestrator, Outcome,
};
use harbour_secrets::{SecretsError, SecretsProvider};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Release completed.
pub const EXIT_SUCCESS: u8 = 0;
/// Migration task failed; the service was not touched.
pub const EXIT_MIGRATION_FAILED: u8 = 1;
/// Service rollout failed.
pub const EXIT_ROLLOUT_FAILED: u8 = 2;
/// A phase timed out or was cancelled; remote state unknown.
pub const EXIT_TIMEOUT: u8 = 3;
/// The release could not be started.
pub const EXIT_SETUP: u8 = 4;
/// Command-line usage error.
pub const EXIT_USAGE: u8 = 64;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("secrets backend: {0}")]
    Secrets(#[from] SecretsError),

    #[error("failed to render report: {0}")]
    Render(#[from] serde_json::Error),
}

/// How the final report is printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
}

/// Arguments for the deploy command.
#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Environment to release to, as named in the configuration
    pub environment: String,

    /// Configuration file (defaults to ./harbour.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Task definition to migrate from, as `family` or `family:revision`
    #[arg(short, long)]
    pub task_definition: Option<String>,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

/// Map a release outcome to the process exit code.
#[must_use]
pub const fn exit_code(outcome: &Outcome) -> u8 {
    match outcome {
        Outcome::Success => EXIT_SUCCESS,
        Outcome::MigrationFailed { .. } => EXIT_MIGRATION_FAILED,
        Outcome::RolloutFailed { .. } => EXIT_ROLLOUT_FAILED,
        Outcome::Timeout { .. } => EXIT_TIMEOUT,
    }
}

/// Render the final report.
pub fn render(report: &DeployReport, format: OutputFormat) -> Result<String, DeployError> {
    match format {
        OutputFormat::Text => Ok(report.to_string()),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
    }
}

fn load_config(args: &DeployArgs) -> Result<ControlConfig, DeployError> {
    match &args.config {
        Some(path) if !path.exists() => Err(DeployError::ConfigNotFound(path.clone())),
        Some(path) => Ok(ControlConfig::from_file(path)?),
        None => Ok(ControlConfig::load()?),
    }
}

/// Run a release and return its report.
pub async fn run(args: &DeployArgs, cancel: &CancellationToken) -> Result<DeployReport, DeployError> {
    let config = load_config(args)?;
    let environment = config.environment(&args.environment)?;

    let secrets = SecretsProvider::from_config(&config.secrets)
        .await?
        .with_context(config.secret_context(&environment.name));
    debug!(backend = config.secrets.backend_name(), "secrets backend ready");

    let sdk_config = load_sdk_config(&config.aws).await;
    info!(region = ?sdk_config.region(), "AWS configuration loaded");

    let orchestrator = Orchestrator::new(
        Arc::new(EcsControlPlane::new(&sdk_config)),
        secrets,
        config.timing(),
    );

    let mut request = DeployRequest::new(environment);
    if let Some(task_definition) = &args.task_definition {
        request = request.with_task_definition(task_definition);
    }

    Ok(orchestrator.deploy(&request, cancel).await?)
}
