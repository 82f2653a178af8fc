//! Control-plane abstraction.
//!
//! Releases talk to the container platform only through [`ControlPlane`].
//! The production implementation drives Amazon ECS; [`FakeControlPlane`]
//! scripts responses for tests and dry runs.

mod ecs;
mod fake;

pub use ecs::{load_sdk_config, EcsControlPlane};
pub use fake::{Call, FakeControlPlane, TaskStep};

use async_trait::async_trait;
use harbour_secrets::SecretValue;

use crate::error::ControlPlaneError;
use crate::types::{ServiceSnapshot, TaskId, TaskPlacement, TaskRun};

/// Value of the `startedBy` tag on tasks launched by a release.
pub const STARTED_BY: &str = "harbour";

/// Request to run a one-off task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTaskRequest {
    /// Cluster to run in.
    pub cluster: String,
    /// Task definition family, `family:revision`, or full ARN.
    pub task_definition: String,
    /// Network and capacity placement.
    pub placement: TaskPlacement,
    /// Per-container overrides.
    pub container: ContainerOverride,
    /// Idempotency token; repeating a request with the same token never
    /// starts a second task.
    pub client_token: String,
    /// Tag recording who launched the task.
    pub started_by: String,
}

impl RunTaskRequest {
    /// Create a request with a fresh client token.
    #[must_use]
    pub fn new(
        cluster: impl Into<String>,
        task_definition: impl Into<String>,
        placement: TaskPlacement,
        container: ContainerOverride,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            task_definition: task_definition.into(),
            placement,
            container,
            client_token: ulid::Ulid::new().to_string(),
            started_by: STARTED_BY.to_owned(),
        }
    }
}

/// Overrides applied to one container of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerOverride {
    /// Container name.
    pub name: String,
    /// Command override; empty keeps the image default.
    pub command: Vec<String>,
    /// Extra environment variables.
    pub environment: Vec<(String, SecretValue)>,
}

impl ContainerOverride {
    /// Override nothing but the container name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: Vec::new(),
            environment: Vec::new(),
        }
    }

    /// Set the command override.
    #[must_use]
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn with_env(mut self, name: impl Into<String>, value: SecretValue) -> Self {
        self.environment.push((name.into(), value));
        self
    }
}

/// Result of asking the platform to start a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskLaunch {
    /// The task was accepted and has an identifier.
    Started(TaskRun),
    /// The platform declined to place the task.
    Rejected {
        /// Platform explanation.
        reason: String,
    },
}

/// Operations a release needs from the container platform.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Start a one-off task.
    async fn run_task(&self, request: &RunTaskRequest) -> Result<TaskLaunch, ControlPlaneError>;

    /// Describe a task.
    ///
    /// Returns `None` if the platform does not (yet) know the task.
    async fn describe_task(
        &self,
        cluster: &str,
        task: &TaskId,
    ) -> Result<Option<TaskRun>, ControlPlaneError>;

    /// Start a new deployment of a service with its current task definition.
    async fn force_new_deployment(
        &self,
        cluster: &str,
        service: &str,
    ) -> Result<ServiceSnapshot, ControlPlaneError>;

    /// Describe a service and its deployments.
    async fn describe_service(
        &self,
        cluster: &str,
        service: &str,
    ) -> Result<ServiceSnapshot, ControlPlaneError>;
}
