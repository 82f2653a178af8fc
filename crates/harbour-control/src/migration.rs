//! Migration phase: run the one-off task and judge it by its exit code.

use harbour_secrets::SecretsProvider;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Timing;
use crate::control_plane::{ContainerOverride, ControlPlane, RunTaskRequest, TaskLaunch};
use crate::error::ControlResult;
use crate::outcome::{Outcome, Phase, PhaseReport};
use crate::poll::{PollError, Poller, Probe};
use crate::types::{Environment, TaskRun};

/// Runs an environment's migration task to completion.
pub struct MigrationRunner<'a> {
    control_plane: &'a dyn ControlPlane,
    secrets: &'a SecretsProvider,
    timing: &'a Timing,
}

impl<'a> MigrationRunner<'a> {
    /// Create a runner.
    #[must_use]
    pub fn new(
        control_plane: &'a dyn ControlPlane,
        secrets: &'a SecretsProvider,
        timing: &'a Timing,
    ) -> Self {
        Self {
            control_plane,
            secrets,
            timing,
        }
    }

    /// Run the migration task from `task_definition` and wait for it to stop.
    ///
    /// Only an exit code of zero from the migration container counts as
    /// success. Errors are returned only when the task could not even be
    /// requested, e.g. a missing connection secret.
    pub async fn run(
        &self,
        environment: &Environment,
        task_definition: &str,
        cancel: &CancellationToken,
    ) -> ControlResult<PhaseReport> {
        let request = self.request(environment, task_definition).await?;
        let poller = Poller::new(self.timing, self.timing.migration_max_wait, cancel.clone());

        info!(
            environment = %environment.name,
            cluster = %environment.cluster,
            task_definition = %task_definition,
            "starting migration task"
        );

        // The client token stays fixed across retries, so a start that landed
        // but timed out on our side is answered with the same task.
        let launch = poller
            .retry(|| self.control_plane.run_task(&request))
            .await;

        let task = match launch {
            Ok(TaskLaunch::Started(task)) => task,
            Ok(TaskLaunch::Rejected { reason }) => {
                warn!(environment = %environment.name, reason = %reason, "migration task not placed");
                return Ok(report(
                    &poller,
                    Outcome::MigrationFailed {
                        exit_code: None,
                        reason: Some(reason),
                        task_id: None,
                    },
                    None,
                ));
            }
            Err(PollError::Rejected(error)) => {
                warn!(environment = %environment.name, error = %error, "migration task refused");
                return Ok(report(
                    &poller,
                    Outcome::MigrationFailed {
                        exit_code: None,
                        reason: Some(error.to_string()),
                        task_id: None,
                    },
                    None,
                ));
            }
            Err(error) => {
                warn!(environment = %environment.name, error = %error, "could not start migration task");
                return Ok(report(
                    &poller,
                    Outcome::timeout(Phase::Migration, error.into_timeout_cause()),
                    None,
                ));
            }
        };

        info!(task = %task.id, "migration task started");
        let container = environment.migration.container.as_str();
        let cluster = environment.cluster.as_str();
        let task_id = &task.id;

        let stopped = poller
            .until(|| async move {
                let run = self.control_plane.describe_task(cluster, task_id).await;
                run.map(|run| match run {
                    Some(run) if run.status.is_terminal() => Probe::Ready(run),
                    Some(run) => {
                        debug!(task = %run.id.short(), status = %run.status, "migration task not finished");
                        Probe::Pending
                    }
                    None => {
                        debug!(task = %task_id.short(), "migration task not visible yet");
                        Probe::Pending
                    }
                })
            })
            .await;

        let outcome = match stopped {
            Ok(run) => judge(&run, container),
            Err(error) => {
                warn!(task = %task.id, error = %error, "stopped waiting for migration task");
                Outcome::timeout(Phase::Migration, error.into_timeout_cause())
            }
        };

        match &outcome {
            Outcome::Success => info!(task = %task.id, "migration succeeded"),
            other => warn!(task = %task.id, outcome = %other, "migration did not succeed"),
        }

        Ok(report(&poller, outcome, Some(task.id.to_string())))
    }

    async fn request(
        &self,
        environment: &Environment,
        task_definition: &str,
    ) -> ControlResult<RunTaskRequest> {
        let migration = &environment.migration;
        let mut container =
            ContainerOverride::new(&migration.container).with_command(migration.command.clone());

        if let Some(secret) = &migration.connection_secret {
            let value = self.secrets.require(secret).await?;
            container = container.with_env(&migration.connection_env, value);
        }

        Ok(RunTaskRequest::new(
            &environment.cluster,
            task_definition,
            migration.placement.clone(),
            container,
        ))
    }
}

/// Classify a stopped task.
fn judge(run: &TaskRun, container: &str) -> Outcome {
    match run.exit_code(container) {
        Some(0) => Outcome::Success,
        exit_code => Outcome::MigrationFailed {
            exit_code,
            reason: run.failure_reason(container),
            task_id: Some(run.id.clone()),
        },
    }
}

fn report(poller: &Poller, outcome: Outcome, resource: Option<String>) -> PhaseReport {
    PhaseReport {
        phase: Phase::Migration,
        outcome,
        elapsed: poller.elapsed(),
        resource,
    }
}
