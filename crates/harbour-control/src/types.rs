//! Core types for harbour-control.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A target deployment environment, such as `staging` or `prod`.
///
/// Everything a release needs to address the control plane is carried here
/// and passed in explicitly; nothing is read from ambient process state once
/// the release has started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Environment name.
    pub name: String,
    /// Cluster the service and migration task run in.
    pub cluster: String,
    /// Long-running service to roll out.
    pub service: String,
    /// Task-definition family used for the migration task.
    pub task_family: String,
    /// How the one-off migration task is launched.
    pub migration: MigrationTask,
}

impl Environment {
    /// Task definition to run migrations from when none is given explicitly.
    ///
    /// A bare family name resolves to its latest `ACTIVE` revision.
    #[must_use]
    pub fn default_task_definition(&self) -> &str {
        &self.task_family
    }
}

/// Launch parameters for the one-off migration task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MigrationTask {
    /// Container within the task definition that runs the migrations.
    pub container: String,

    /// Command override; the image's default command is used when empty.
    #[serde(default)]
    pub command: Vec<String>,

    /// Network and capacity placement.
    #[serde(flatten)]
    pub placement: TaskPlacement,

    /// Secret holding the database connection string, if the task needs one
    /// injected.
    #[serde(default)]
    pub connection_secret: Option<String>,

    /// Environment variable the connection string is injected as.
    #[serde(default = "default_connection_env")]
    pub connection_env: String,
}

fn default_connection_env() -> String {
    "DATABASE_URL".to_owned()
}

/// Network and capacity placement for a one-off task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TaskPlacement {
    /// Subnets for `awsvpc` networking.
    #[serde(default)]
    pub subnets: Vec<String>,

    /// Security groups for `awsvpc` networking.
    #[serde(default)]
    pub security_groups: Vec<String>,

    /// Whether the task ENI gets a public IP.
    #[serde(default)]
    pub assign_public_ip: bool,

    /// Capacity provider to place the task on (e.g. a spot provider).
    #[serde(default)]
    pub capacity_provider: Option<String>,

    /// Launch type (`EC2`, `FARGATE`, `EXTERNAL`).
    #[serde(default)]
    pub launch_type: Option<String>,
}

/// Where the control plane should find capacity for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capacity<'a> {
    /// Use the cluster's default capacity provider strategy.
    ClusterDefault,
    /// Use a single named capacity provider.
    Provider(&'a str),
    /// Use an explicit launch type.
    LaunchType(&'a str),
}

impl TaskPlacement {
    /// Resolve the capacity selection.
    ///
    /// Callers validate up front that at most one of `capacity_provider` and
    /// `launch_type` is set; if both are, the provider wins.
    #[must_use]
    pub fn capacity(&self) -> Capacity<'_> {
        match (&self.capacity_provider, &self.launch_type) {
            (Some(provider), _) => Capacity::Provider(provider),
            (None, Some(launch_type)) => Capacity::LaunchType(launch_type),
            (None, None) => Capacity::ClusterDefault,
        }
    }

    /// Returns true if the task needs an `awsvpc` network configuration.
    #[must_use]
    pub fn uses_awsvpc(&self) -> bool {
        !self.subnets.is_empty()
    }
}

/// Identifier of a task, as assigned by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a new task ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The trailing component of an ARN-style identifier.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status of a task.
///
/// The platform reports finer-grained states; they fold into these three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Accepted but not yet running.
    Pending,
    /// Running, or shutting down.
    Running,
    /// Terminal.
    Stopped,
}

impl TaskStatus {
    /// Fold a platform `lastStatus` value into a task status.
    ///
    /// Unknown values are treated as pending so they can never be mistaken
    /// for a terminal state.
    #[must_use]
    pub fn from_platform(status: &str) -> Self {
        match status {
            "RUNNING" | "DEACTIVATING" | "STOPPING" | "DEPROVISIONING" => Self::Running,
            "STOPPED" | "DELETED" => Self::Stopped,
            _ => Self::Pending,
        }
    }

    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
        }
    }

    /// Returns true once the task can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exit information for one container of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerExit {
    /// Container name.
    pub name: String,
    /// Exit code, present once the container has stopped.
    pub exit_code: Option<i32>,
    /// Platform reason, e.g. `CannotPullContainerError`.
    pub reason: Option<String>,
}

/// One invocation of a one-off task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRun {
    /// Task identifier.
    pub id: TaskId,
    /// Task-definition revision the task runs.
    pub task_definition: String,
    /// Current status.
    pub status: TaskStatus,
    /// Per-container exit information.
    pub containers: Vec<ContainerExit>,
    /// Platform reason the task stopped, if it has.
    pub stop_reason: Option<String>,
}

impl TaskRun {
    /// Exit information for the named container.
    ///
    /// Falls back to the only container when the task has exactly one.
    #[must_use]
    pub fn container(&self, name: &str) -> Option<&ContainerExit> {
        self.containers
            .iter()
            .find(|c| c.name == name)
            .or_else(|| match self.containers.as_slice() {
                [only] => Some(only),
                _ => None,
            })
    }

    /// Exit code of the named container, once the task has stopped.
    #[must_use]
    pub fn exit_code(&self, container: &str) -> Option<i32> {
        if !self.status.is_terminal() {
            return None;
        }
        self.container(container).and_then(|c| c.exit_code)
    }

    /// Best available explanation for why the task stopped.
    #[must_use]
    pub fn failure_reason(&self, container: &str) -> Option<String> {
        let container_reason = self.container(container).and_then(|c| c.reason.clone());
        match (&self.stop_reason, container_reason) {
            (Some(task), Some(container)) => Some(format!("{task} ({container})")),
            (Some(task), None) => Some(task.clone()),
            (None, container) => container,
        }
    }
}

/// Unique identifier for a service deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(String);

impl DeploymentId {
    /// Create a new deployment ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DeploymentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Role of a deployment within its service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    /// The most recent deployment; the one being rolled towards.
    Primary,
    /// An older deployment still draining.
    Active,
    /// Fully drained.
    Inactive,
}

impl DeploymentStatus {
    /// Parse a platform deployment status.
    #[must_use]
    pub fn from_platform(status: &str) -> Self {
        match status {
            "PRIMARY" => Self::Primary,
            "INACTIVE" => Self::Inactive,
            _ => Self::Active,
        }
    }
}

/// Rollout progress of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolloutState {
    /// Tasks are being replaced.
    InProgress,
    /// Steady state reached.
    Completed,
    /// The platform gave up on this deployment.
    Failed,
}

impl RolloutState {
    /// Get the state name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RolloutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One deployment of a long-running service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDeployment {
    /// Deployment identifier.
    pub id: DeploymentId,
    /// Role within the service.
    pub status: DeploymentStatus,
    /// Task-definition revision this deployment runs.
    pub task_definition: String,
    /// Tasks the deployment wants.
    pub desired_count: u32,
    /// Tasks currently running.
    pub running_count: u32,
    /// Tasks launched but not yet running.
    pub pending_count: u32,
    /// Rollout state; absent on platforms without rollout tracking.
    pub rollout_state: Option<RolloutState>,
    /// Platform explanation of the rollout state.
    pub rollout_state_reason: Option<String>,
}

impl ServiceDeployment {
    /// Returns true if the deployment runs exactly what it wants.
    #[must_use]
    pub const fn is_at_capacity(&self) -> bool {
        self.running_count == self.desired_count && self.pending_count == 0
    }
}

/// Point-in-time view of a service and its deployments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    /// Service name.
    pub service: String,
    /// Deployments currently associated with the service.
    pub deployments: Vec<ServiceDeployment>,
}

impl ServiceSnapshot {
    /// The primary (newest) deployment.
    #[must_use]
    pub fn primary(&self) -> Option<&ServiceDeployment> {
        self.deployments
            .iter()
            .find(|d| d.status == DeploymentStatus::Primary)
    }

    /// Look up a deployment by ID.
    #[must_use]
    pub fn deployment(&self, id: &DeploymentId) -> Option<&ServiceDeployment> {
        self.deployments.iter().find(|d| &d.id == id)
    }

    /// Returns true if a rollout is currently underway.
    ///
    /// Either an older deployment is still draining, or the primary
    /// deployment reports that it is still in progress. A primary whose
    /// rollout has failed is never underway, whatever is still draining.
    #[must_use]
    pub fn rollout_in_progress(&self) -> bool {
        let Some(primary) = self.primary() else {
            return false;
        };
        if primary.rollout_state == Some(RolloutState::Failed) {
            return false;
        }

        let live = self
            .deployments
            .iter()
            .filter(|d| d.status != DeploymentStatus::Inactive)
            .filter(|d| d.rollout_state != Some(RolloutState::Failed))
            .count();

        live > 1 || primary.rollout_state == Some(RolloutState::InProgress)
    }

    /// Returns true if the service has converged on the given deployment.
    ///
    /// Converged means it is the only live deployment, it runs its desired
    /// count with nothing pending, and it is not mid-rollout or failed.
    #[must_use]
    pub fn is_settled_on(&self, id: &DeploymentId) -> bool {
        let mut live = self
            .deployments
            .iter()
            .filter(|d| d.status != DeploymentStatus::Inactive);

        match (live.next(), live.next()) {
            (Some(only), None) => {
                &only.id == id
                    && only.is_at_capacity()
                    && matches!(only.rollout_state, None | Some(RolloutState::Completed))
            }
            _ => false,
        }
    }
}
