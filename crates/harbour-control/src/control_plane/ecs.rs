//! Amazon ECS implementation of [`ControlPlane`].

use std::time::Duration;

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_ecs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ecs::types::{
    AssignPublicIp, AwsVpcConfiguration, CapacityProviderStrategyItem, Container,
    ContainerOverride as EcsContainerOverride, Deployment, DeploymentRolloutState, Failure,
    KeyValuePair, LaunchType, NetworkConfiguration, Service, Task, TaskOverride,
};
use aws_sdk_ecs::Client;

use super::{ContainerOverride, ControlPlane, RunTaskRequest, TaskLaunch};
use crate::config::AwsConfig;
use crate::error::ControlPlaneError;
use crate::types::{
    Capacity, ContainerExit, DeploymentId, DeploymentStatus, RolloutState, ServiceDeployment,
    ServiceSnapshot, TaskId, TaskPlacement, TaskRun, TaskStatus,
};

/// Failure reason ECS reports for unknown task ARNs.
const MISSING: &str = "MISSING";

/// Load AWS SDK configuration from the default chain.
///
/// The region override and per-operation timeout come from `config`.
pub async fn load_sdk_config(config: &AwsConfig) -> SdkConfig {
    let timeouts = TimeoutConfig::builder()
        .operation_timeout(Duration::from_secs(config.request_timeout_secs))
        .build();

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).timeout_config(timeouts);
    if let Some(region) = &config.region {
        loader = loader.region(Region::new(region.clone()));
    }
    loader.load().await
}

/// ECS control plane.
#[derive(Debug, Clone)]
pub struct EcsControlPlane {
    client: Client,
}

impl EcsControlPlane {
    /// Create a control plane from loaded SDK configuration.
    #[must_use]
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
        }
    }

    /// Create a control plane from an existing client.
    #[must_use]
    pub const fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ControlPlane for EcsControlPlane {
    async fn run_task(&self, request: &RunTaskRequest) -> Result<TaskLaunch, ControlPlaneError> {
        let mut call = self
            .client
            .run_task()
            .cluster(&request.cluster)
            .task_definition(&request.task_definition)
            .count(1)
            .started_by(&request.started_by)
            .client_token(&request.client_token)
            .overrides(task_override(&request.container));

        if let Some(network) = network_configuration(&request.placement)? {
            call = call.network_configuration(network);
        }

        call = match request.placement.capacity() {
            Capacity::ClusterDefault => call,
            Capacity::Provider(provider) => call.capacity_provider_strategy(
                CapacityProviderStrategyItem::builder()
                    .capacity_provider(provider)
                    .weight(1)
                    .build()
                    .map_err(|e| ControlPlaneError::rejected(e.to_string()))?,
            ),
            Capacity::LaunchType(launch_type) => call.launch_type(LaunchType::from(launch_type)),
        };

        let output = call.send().await.map_err(classify)?;

        if let Some(task) = output.tasks().first() {
            return Ok(TaskLaunch::Started(task_run(task)?));
        }

        let reason = output
            .failures()
            .iter()
            .map(failure_text)
            .collect::<Vec<_>>()
            .join("; ");
        Ok(TaskLaunch::Rejected {
            reason: if reason.is_empty() {
                "no task was started".to_owned()
            } else {
                reason
            },
        })
    }

    async fn describe_task(
        &self,
        cluster: &str,
        task: &TaskId,
    ) -> Result<Option<TaskRun>, ControlPlaneError> {
        let output = self
            .client
            .describe_tasks()
            .cluster(cluster)
            .tasks(task.as_str())
            .send()
            .await
            .map_err(classify)?;

        if let Some(found) = output.tasks().first() {
            return task_run(found).map(Some);
        }

        match output.failures().first() {
            None => Ok(None),
            Some(failure) if failure.reason() == Some(MISSING) => Ok(None),
            Some(failure) => Err(ControlPlaneError::rejected(failure_text(failure))),
        }
    }

    async fn force_new_deployment(
        &self,
        cluster: &str,
        service: &str,
    ) -> Result<ServiceSnapshot, ControlPlaneError> {
        let output = self
            .client
            .update_service()
            .cluster(cluster)
            .service(service)
            .force_new_deployment(true)
            .send()
            .await
            .map_err(classify)?;

        output
            .service()
            .map(service_snapshot)
            .ok_or_else(|| ControlPlaneError::NotFound(format!("service {service}")))
    }

    async fn describe_service(
        &self,
        cluster: &str,
        service: &str,
    ) -> Result<ServiceSnapshot, ControlPlaneError> {
        let output = self
            .client
            .describe_services()
            .cluster(cluster)
            .services(service)
            .send()
            .await
            .map_err(classify)?;

        match output.services().first() {
            Some(found) => Ok(service_snapshot(found)),
            None => Err(ControlPlaneError::NotFound(
                output
                    .failures()
                    .first()
                    .map_or_else(|| format!("service {service}"), failure_text),
            )),
        }
    }
}

fn network_configuration(
    placement: &TaskPlacement,
) -> Result<Option<NetworkConfiguration>, ControlPlaneError> {
    if !placement.uses_awsvpc() {
        return Ok(None);
    }

    let vpc = AwsVpcConfiguration::builder()
        .set_subnets(Some(placement.subnets.clone()))
        .set_security_groups(
            (!placement.security_groups.is_empty()).then(|| placement.security_groups.clone()),
        )
        .assign_public_ip(if placement.assign_public_ip {
            AssignPublicIp::Enabled
        } else {
            AssignPublicIp::Disabled
        })
        .build()
        .map_err(|e| ControlPlaneError::rejected(e.to_string()))?;

    Ok(Some(
        NetworkConfiguration::builder()
            .awsvpc_configuration(vpc)
            .build(),
    ))
}

fn task_override(container: &ContainerOverride) -> TaskOverride {
    let mut builder = EcsContainerOverride::builder().name(&container.name);
    if !container.command.is_empty() {
        builder = builder.set_command(Some(container.command.clone()));
    }
    for (name, value) in &container.environment {
        builder = builder.environment(
            KeyValuePair::builder()
                .name(name)
                .value(value.expose())
                .build(),
        );
    }

    TaskOverride::builder()
        .container_overrides(builder.build())
        .build()
}

fn task_run(task: &Task) -> Result<TaskRun, ControlPlaneError> {
    let arn = task
        .task_arn()
        .ok_or_else(|| ControlPlaneError::unavailable("task without an ARN in response"))?;

    Ok(TaskRun {
        id: TaskId::new(arn),
        task_definition: task.task_definition_arn().unwrap_or_default().to_owned(),
        status: TaskStatus::from_platform(task.last_status().unwrap_or_default()),
        containers: task.containers().iter().map(container_exit).collect(),
        stop_reason: task.stopped_reason().map(str::to_owned),
    })
}

fn container_exit(container: &Container) -> ContainerExit {
    ContainerExit {
        name: container.name().unwrap_or_default().to_owned(),
        exit_code: container.exit_code(),
        reason: container.reason().map(str::to_owned),
    }
}

fn service_snapshot(service: &Service) -> ServiceSnapshot {
    ServiceSnapshot {
        service: service.service_name().unwrap_or_default().to_owned(),
        deployments: service.deployments().iter().map(service_deployment).collect(),
    }
}

fn service_deployment(deployment: &Deployment) -> ServiceDeployment {
    ServiceDeployment {
        id: DeploymentId::new(deployment.id().unwrap_or_default()),
        status: DeploymentStatus::from_platform(deployment.status().unwrap_or_default()),
        task_definition: deployment.task_definition().unwrap_or_default().to_owned(),
        desired_count: count(deployment.desired_count()),
        running_count: count(deployment.running_count()),
        pending_count: count(deployment.pending_count()),
        rollout_state: deployment.rollout_state().and_then(rollout_state),
        rollout_state_reason: deployment.rollout_state_reason().map(str::to_owned),
    }
}

fn rollout_state(state: &DeploymentRolloutState) -> Option<RolloutState> {
    match state {
        DeploymentRolloutState::InProgress => Some(RolloutState::InProgress),
        DeploymentRolloutState::Completed => Some(RolloutState::Completed),
        DeploymentRolloutState::Failed => Some(RolloutState::Failed),
        _ => None,
    }
}

fn count(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn failure_text(failure: &Failure) -> String {
    match (failure.reason(), failure.detail()) {
        (Some(reason), Some(detail)) => format!("{reason}: {detail}"),
        (Some(reason), None) => reason.to_owned(),
        (None, Some(detail)) => detail.to_owned(),
        (None, None) => "unknown failure".to_owned(),
    }
}

/// Sort an SDK error into the transient/permanent taxonomy.
fn classify<E, R>(err: SdkError<E, R>) -> ControlPlaneError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ControlPlaneError::unavailable(DisplayErrorContext(&err).to_string())
        }
        _ => match err.code() {
            Some("ThrottlingException" | "TooManyRequestsException") => {
                ControlPlaneError::Throttled(DisplayErrorContext(&err).to_string())
            }
            Some("ServerException") => {
                ControlPlaneError::unavailable(DisplayErrorContext(&err).to_string())
            }
            Some("ClusterNotFoundException" | "ServiceNotFoundException") => {
                ControlPlaneError::NotFound(
                    err.message().unwrap_or("resource not found").to_owned(),
                )
            }
            _ => ControlPlaneError::rejected(DisplayErrorContext(&err).to_string()),
        },
    }
}
