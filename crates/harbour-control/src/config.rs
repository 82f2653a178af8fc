//! Configuration for harbour-control.

use std::collections::BTreeMap;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use harbour_secrets::{SecretContext, SecretsConfig};
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};
use crate::types::{Environment, MigrationTask};

/// Default configuration file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "harbour.toml";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "HARBOUR_";

/// Top-level configuration for a release run.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// Project name, used to scope secret lookups.
    #[serde(default)]
    pub project: Option<String>,

    /// AWS client configuration.
    #[serde(default)]
    pub aws: AwsConfig,

    /// Polling and retry behaviour shared by both phases.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Migration phase limits.
    #[serde(default)]
    pub migration: MigrationPhaseConfig,

    /// Rollout phase limits.
    #[serde(default)]
    pub rollout: RolloutPhaseConfig,

    /// Secrets backend.
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Deployable environments, keyed by name.
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `harbour.toml` in the current directory (if present)
    /// 3. Environment variables with `HARBOUR_` prefix
    pub fn load() -> ControlResult<Self> {
        Self::from_file(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Self::from_figment(Figment::new().merge(Toml::file(path.as_ref())))
    }

    /// Load configuration from an in-memory TOML document.
    ///
    /// Environment variable overrides still apply.
    pub fn from_toml_str(toml: &str) -> ControlResult<Self> {
        Self::from_figment(Figment::new().merge(Toml::string(toml)))
    }

    fn from_figment(figment: Figment) -> ControlResult<Self> {
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> ControlResult<()> {
        for (key, value) in [
            ("polling.interval_secs", self.polling.interval_secs),
            ("aws.request_timeout_secs", self.aws.request_timeout_secs),
            ("migration.max_wait_secs", self.migration.max_wait_secs),
            ("rollout.max_wait_secs", self.rollout.max_wait_secs),
        ] {
            if value == 0 {
                return Err(ControlError::Config(format!("{key} must be at least 1")));
            }
        }
        if self.polling.max_consecutive_errors == 0 {
            return Err(ControlError::config(
                "polling.max_consecutive_errors must be at least 1",
            ));
        }

        for (name, env) in &self.environments {
            let placement = &env.migration.placement;
            if placement.capacity_provider.is_some() && placement.launch_type.is_some() {
                return Err(ControlError::Config(format!(
                    "environment {name}: capacity_provider and launch_type are mutually exclusive"
                )));
            }
            if placement.subnets.is_empty() && !placement.security_groups.is_empty() {
                return Err(ControlError::Config(format!(
                    "environment {name}: security_groups require subnets"
                )));
            }
        }

        Ok(())
    }

    /// Resolve a named environment.
    pub fn environment(&self, name: &str) -> ControlResult<Environment> {
        let config = self
            .environments
            .get(name)
            .ok_or_else(|| ControlError::UnknownEnvironment {
                name: name.to_owned(),
                known: self
                    .environments
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            })?;

        Ok(config.clone().into_environment(name))
    }

    /// Secret resolution context for a release to the named environment.
    #[must_use]
    pub fn secret_context(&self, environment: &str) -> SecretContext {
        let ctx = SecretContext::new().with_environment(environment);
        match &self.project {
            Some(project) => ctx.with_project(project),
            None => ctx,
        }
    }

    /// Timing parameters for a release.
    #[must_use]
    pub fn timing(&self) -> Timing {
        Timing {
            interval: Duration::from_secs(self.polling.interval_secs),
            request_timeout: Duration::from_secs(self.aws.request_timeout_secs),
            max_consecutive_errors: self.polling.max_consecutive_errors,
            initial_backoff: Duration::from_millis(self.polling.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.polling.max_backoff_ms),
            migration_max_wait: Duration::from_secs(self.migration.max_wait_secs),
            rollout_max_wait: Duration::from_secs(self.rollout.max_wait_secs),
        }
    }
}

/// AWS client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    /// Region override; the default AWS chain applies when unset.
    #[serde(default)]
    pub region: Option<String>,

    /// Per-call timeout in seconds, separate from the phase max-wait.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

const fn default_request_timeout_secs() -> u64 {
    20
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Polling and retry behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Delay between status checks in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Consecutive failed calls tolerated before a phase gives up.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// First retry delay after a failed call, in milliseconds.
    ///
    /// The delay doubles after each consecutive failure, up to
    /// `max_backoff_ms`.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Cap on the retry delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_interval_secs() -> u64 {
    5
}

const fn default_max_consecutive_errors() -> u32 {
    5
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_consecutive_errors: default_max_consecutive_errors(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Migration phase limits.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationPhaseConfig {
    /// How long to wait for the migration task to stop, in seconds.
    #[serde(default = "default_migration_max_wait_secs")]
    pub max_wait_secs: u64,
}

const fn default_migration_max_wait_secs() -> u64 {
    900 // 15 minutes
}

impl Default for MigrationPhaseConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: default_migration_max_wait_secs(),
        }
    }
}

/// Rollout phase limits.
#[derive(Debug, Clone, Deserialize)]
pub struct RolloutPhaseConfig {
    /// How long to wait for the service to stabilise, in seconds.
    #[serde(default = "default_rollout_max_wait_secs")]
    pub max_wait_secs: u64,
}

const fn default_rollout_max_wait_secs() -> u64 {
    1200 // 20 minutes
}

impl Default for RolloutPhaseConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: default_rollout_max_wait_secs(),
        }
    }
}

/// Configuration for one deployable environment.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentConfig {
    /// Cluster name or ARN.
    pub cluster: String,
    /// Service name or ARN.
    pub service: String,
    /// Task-definition family for the migration task.
    pub task_family: String,
    /// Migration task launch parameters.
    pub migration: MigrationTask,
}

impl EnvironmentConfig {
    fn into_environment(self, name: &str) -> Environment {
        Environment {
            name: name.to_owned(),
            cluster: self.cluster,
            service: self.service,
            task_family: self.task_family,
            migration: self.migration,
        }
    }
}

/// Resolved timing parameters for a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Delay between status checks.
    pub interval: Duration,
    /// Budget for each individual control-plane call.
    pub request_timeout: Duration,
    /// Consecutive failed calls tolerated before a phase gives up.
    pub max_consecutive_errors: u32,
    /// First retry delay after a failed call.
    pub initial_backoff: Duration,
    /// Cap on the retry delay.
    pub max_backoff: Duration,
    /// Migration phase max-wait.
    pub migration_max_wait: Duration,
    /// Rollout phase max-wait.
    pub rollout_max_wait: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        ControlConfig::default().timing()
    }
}
