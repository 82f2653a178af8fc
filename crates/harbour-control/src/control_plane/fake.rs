//! Scripted control plane for tests and rehearsals.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{ControlPlane, RunTaskRequest, TaskLaunch};
use crate::error::ControlPlaneError;
use crate::types::{
    ContainerExit, DeploymentId, DeploymentStatus, RolloutState, ServiceDeployment,
    ServiceSnapshot, TaskId, TaskRun, TaskStatus,
};

/// A call received by the fake, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `run_task`.
    RunTask {
        /// Cluster requested.
        cluster: String,
        /// Task definition requested.
        task_definition: String,
        /// Idempotency token sent.
        client_token: String,
        /// Environment variable names injected into the container.
        env_names: Vec<String>,
    },
    /// `describe_task`.
    DescribeTask {
        /// Task described.
        task: TaskId,
    },
    /// `force_new_deployment`.
    ForceNewDeployment {
        /// Service forced.
        service: String,
    },
    /// `describe_service`.
    DescribeService {
        /// Service described.
        service: String,
    },
}

/// What `describe_task` reports on successive calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStep {
    /// The platform does not know the task yet.
    Invisible,
    /// Pending placement.
    Pending,
    /// Running.
    Running,
    /// Stopped with the given container exit code.
    Exited(i32),
    /// Stopped before the container produced an exit code.
    StoppedWithoutExit(String),
    /// The describe call fails.
    Error(ControlPlaneError),
}

#[derive(Debug)]
struct State {
    calls: Vec<Call>,
    launch_failures: VecDeque<ControlPlaneError>,
    launch_rejection: Option<String>,
    launched: HashMap<String, TaskRun>,
    task_steps: VecDeque<TaskStep>,
    service_steps: VecDeque<Result<ServiceSnapshot, ControlPlaneError>>,
    force_results: VecDeque<Result<ServiceSnapshot, ControlPlaneError>>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            launch_failures: VecDeque::new(),
            launch_rejection: None,
            launched: HashMap::new(),
            task_steps: VecDeque::from([TaskStep::Exited(0)]),
            service_steps: VecDeque::new(),
            force_results: VecDeque::new(),
        }
    }
}

/// In-memory [`ControlPlane`] driven by scripted responses.
///
/// Scripted sequences advance one step per call and repeat their last step
/// once exhausted. Every call is recorded for inspection.
#[derive(Debug, Default)]
pub struct FakeControlPlane {
    state: Mutex<State>,
}

impl FakeControlPlane {
    /// Create a fake whose migration task exits 0 immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the task's observed states.
    #[must_use]
    pub fn with_task_steps(self, steps: impl IntoIterator<Item = TaskStep>) -> Self {
        let steps: VecDeque<_> = steps.into_iter().collect();
        if !steps.is_empty() {
            self.lock().task_steps = steps;
        }
        self
    }

    /// Fail the next `run_task` calls with `errors`, in order.
    #[must_use]
    pub fn with_launch_failures(self, errors: impl IntoIterator<Item = ControlPlaneError>) -> Self {
        self.lock().launch_failures.extend(errors);
        self
    }

    /// Have the platform decline to place the task.
    #[must_use]
    pub fn with_launch_rejection(self, reason: impl Into<String>) -> Self {
        self.lock().launch_rejection = Some(reason.into());
        self
    }

    /// Script the service's observed states.
    #[must_use]
    pub fn with_service_steps(
        self,
        steps: impl IntoIterator<Item = Result<ServiceSnapshot, ControlPlaneError>>,
    ) -> Self {
        self.lock().service_steps = steps.into_iter().collect();
        self
    }

    /// Script responses to `force_new_deployment`, in order.
    ///
    /// Unscripted forces answer with the next service step.
    #[must_use]
    pub fn with_force_results(
        self,
        results: impl IntoIterator<Item = Result<ServiceSnapshot, ControlPlaneError>>,
    ) -> Self {
        self.lock().force_results = results.into_iter().collect();
        self
    }

    /// All calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of distinct tasks started.
    #[must_use]
    pub fn tasks_started(&self) -> usize {
        self.lock().launched.len()
    }

    /// Number of `force_new_deployment` calls received.
    #[must_use]
    pub fn force_count(&self) -> usize {
        self.count(|c| matches!(c, Call::ForceNewDeployment { .. }))
    }

    /// Number of `describe_service` calls received.
    #[must_use]
    pub fn describe_service_count(&self) -> usize {
        self.count(|c| matches!(c, Call::DescribeService { .. }))
    }

    /// A service settled on a single completed deployment.
    #[must_use]
    pub fn stable(service: &str, deployment: &str, count: u32) -> ServiceSnapshot {
        ServiceSnapshot {
            service: service.to_owned(),
            deployments: vec![deployment_with(
                deployment,
                DeploymentStatus::Primary,
                count,
                count,
                RolloutState::Completed,
            )],
        }
    }

    /// A service rolling from `old` to `new`, with `running` new tasks up.
    #[must_use]
    pub fn rolling(
        service: &str,
        new: &str,
        old: &str,
        desired: u32,
        running: u32,
    ) -> ServiceSnapshot {
        ServiceSnapshot {
            service: service.to_owned(),
            deployments: vec![
                deployment_with(
                    new,
                    DeploymentStatus::Primary,
                    desired,
                    running,
                    RolloutState::InProgress,
                ),
                deployment_with(
                    old,
                    DeploymentStatus::Active,
                    desired,
                    desired.saturating_sub(running),
                    RolloutState::Completed,
                ),
            ],
        }
    }

    /// A service whose new deployment `new` was given up on.
    #[must_use]
    pub fn failed(service: &str, new: &str, old: &str, reason: &str) -> ServiceSnapshot {
        let mut snapshot = Self::rolling(service, new, old, 1, 0);
        if let Some(primary) = snapshot.deployments.first_mut() {
            primary.rollout_state = Some(RolloutState::Failed);
            primary.rollout_state_reason = Some(reason.to_owned());
        }
        snapshot
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }
}

fn deployment_with(
    id: &str,
    status: DeploymentStatus,
    desired: u32,
    running: u32,
    rollout: RolloutState,
) -> ServiceDeployment {
    ServiceDeployment {
        id: DeploymentId::new(id),
        status,
        task_definition: format!("arn:aws:ecs:local:000000000000:task-definition/{id}"),
        desired_count: desired,
        running_count: running,
        pending_count: 0,
        rollout_state: Some(rollout),
        rollout_state_reason: None,
    }
}

/// Pop the next step, keeping the last one in place.
fn advance<T: Clone>(steps: &mut VecDeque<T>) -> Option<T> {
    if steps.len() > 1 {
        steps.pop_front()
    } else {
        steps.front().cloned()
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn run_task(&self, request: &RunTaskRequest) -> Result<TaskLaunch, ControlPlaneError> {
        let mut state = self.lock();
        state.calls.push(Call::RunTask {
            cluster: request.cluster.clone(),
            task_definition: request.task_definition.clone(),
            client_token: request.client_token.clone(),
            env_names: request
                .container
                .environment
                .iter()
                .map(|(name, _)| name.clone())
                .collect(),
        });

        if let Some(error) = state.launch_failures.pop_front() {
            return Err(error);
        }
        if let Some(reason) = &state.launch_rejection {
            return Ok(TaskLaunch::Rejected {
                reason: reason.clone(),
            });
        }

        let next = state.launched.len() + 1;
        let run = state
            .launched
            .entry(request.client_token.clone())
            .or_insert_with(|| TaskRun {
                id: TaskId::new(format!(
                    "arn:aws:ecs:local:000000000000:task/{}/{next:08}",
                    request.cluster
                )),
                task_definition: request.task_definition.clone(),
                status: TaskStatus::Pending,
                containers: vec![ContainerExit {
                    name: request.container.name.clone(),
                    exit_code: None,
                    reason: None,
                }],
                stop_reason: None,
            })
            .clone();

        Ok(TaskLaunch::Started(run))
    }

    async fn describe_task(
        &self,
        _cluster: &str,
        task: &TaskId,
    ) -> Result<Option<TaskRun>, ControlPlaneError> {
        let mut state = self.lock();
        state.calls.push(Call::DescribeTask { task: task.clone() });

        let Some(mut run) = state.launched.values().find(|r| &r.id == task).cloned() else {
            return Ok(None);
        };

        match advance(&mut state.task_steps) {
            None | Some(TaskStep::Invisible) => return Ok(None),
            Some(TaskStep::Error(error)) => return Err(error),
            Some(TaskStep::Pending) => run.status = TaskStatus::Pending,
            Some(TaskStep::Running) => run.status = TaskStatus::Running,
            Some(TaskStep::Exited(code)) => {
                run.status = TaskStatus::Stopped;
                run.stop_reason = Some("Essential container in task exited".to_owned());
                for container in &mut run.containers {
                    container.exit_code = Some(code);
                }
            }
            Some(TaskStep::StoppedWithoutExit(reason)) => {
                run.status = TaskStatus::Stopped;
                run.stop_reason = Some(reason);
            }
        }

        Ok(Some(run))
    }

    async fn force_new_deployment(
        &self,
        _cluster: &str,
        service: &str,
    ) -> Result<ServiceSnapshot, ControlPlaneError> {
        let mut state = self.lock();
        state.calls.push(Call::ForceNewDeployment {
            service: service.to_owned(),
        });

        match state.force_results.pop_front() {
            Some(result) => result,
            None => advance(&mut state.service_steps)
                .unwrap_or_else(|| Err(ControlPlaneError::NotFound(format!("service {service}")))),
        }
    }

    async fn describe_service(
        &self,
        _cluster: &str,
        service: &str,
    ) -> Result<ServiceSnapshot, ControlPlaneError> {
        let mut state = self.lock();
        state.calls.push(Call::DescribeService {
            service: service.to_owned(),
        });

        advance(&mut state.service_steps)
            .unwrap_or_else(|| Err(ControlPlaneError::NotFound(format!("service {service}"))))
    }
}
