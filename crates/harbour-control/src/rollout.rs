//! Rollout phase: start a service deployment and wait for it to settle.
//!
//! A rollout that is already underway is followed rather than forced again,
//! so two releases racing each other coalesce onto one deployment instead of
//! cancelling each other out.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Timing;
use crate::control_plane::ControlPlane;
use crate::outcome::{Outcome, Phase, PhaseReport};
use crate::poll::{PollError, Poller, Probe};
use crate::types::{DeploymentId, DeploymentStatus, Environment, RolloutState, ServiceSnapshot};

/// Rolls an environment's service and tracks it to a steady state.
pub struct RolloutController<'a> {
    control_plane: &'a dyn ControlPlane,
    timing: &'a Timing,
}

impl<'a> RolloutController<'a> {
    /// Create a controller.
    #[must_use]
    pub fn new(control_plane: &'a dyn ControlPlane, timing: &'a Timing) -> Self {
        Self {
            control_plane,
            timing,
        }
    }

    /// Roll the service and wait until it runs only the new deployment.
    pub async fn run(&self, environment: &Environment, cancel: &CancellationToken) -> PhaseReport {
        let poller = Poller::new(self.timing, self.timing.rollout_max_wait, cancel.clone());
        let cluster = environment.cluster.as_str();
        let service = environment.service.as_str();

        let target = match self.start(&poller, cluster, service).await {
            Ok(target) => target,
            Err(outcome) => return report(&poller, outcome, None),
        };

        info!(service = %service, deployment = %target, "waiting for rollout to settle");

        let tracked = &target;
        let settled = poller
            .until(|| async move {
                let snapshot = self.control_plane.describe_service(cluster, service).await;
                snapshot.map(|snapshot| judge(&snapshot, tracked))
            })
            .await;

        let outcome = match settled {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(service = %service, deployment = %target, error = %error, "stopped waiting for rollout");
                Outcome::timeout(Phase::Rollout, error.into_timeout_cause())
            }
        };

        match &outcome {
            Outcome::Success => info!(service = %service, deployment = %target, "rollout settled"),
            other => warn!(service = %service, outcome = %other, "rollout did not succeed"),
        }

        report(&poller, outcome, Some(target.to_string()))
    }

    /// Decide which deployment to wait for, forcing a new one if needed.
    async fn start(
        &self,
        poller: &Poller,
        cluster: &str,
        service: &str,
    ) -> Result<DeploymentId, Outcome> {
        let current = poller
            .retry(|| self.control_plane.describe_service(cluster, service))
            .await
            .map_err(phase_error)?;

        if current.rollout_in_progress() {
            if let Some(primary) = current.primary() {
                info!(
                    service = %service,
                    deployment = %primary.id,
                    "rollout already in progress, following it instead of forcing another"
                );
                return Ok(primary.id.clone());
            }
        }

        let before = current.primary().map(|d| d.id.clone());
        let before = before.as_ref();
        let attempted = &AtomicBool::new(false);

        // After a failed force, look before forcing again: the request may
        // have landed even though the response was lost.
        let forced = poller
            .retry(|| async move {
                if attempted.swap(true, Ordering::SeqCst) {
                    match self.control_plane.describe_service(cluster, service).await {
                        Ok(snapshot) if primary_changed(&snapshot, before) => {
                            debug!(service = %service, "earlier force landed");
                            return Ok(snapshot);
                        }
                        Ok(_) => {}
                        Err(error) => return Err(error),
                    }
                }
                self.control_plane.force_new_deployment(cluster, service).await
            })
            .await
            .map_err(phase_error)?;

        match forced.primary() {
            Some(primary) => {
                info!(service = %service, deployment = %primary.id, "forced new deployment");
                Ok(primary.id.clone())
            }
            None => Err(Outcome::RolloutFailed {
                reason: format!("service {service} has no primary deployment"),
                deployment_id: None,
            }),
        }
    }
}

fn primary_changed(snapshot: &ServiceSnapshot, before: Option<&DeploymentId>) -> bool {
    snapshot.primary().map(|d| &d.id) != before
}

/// Map a failure to start the rollout onto an outcome.
///
/// An outright refusal means nothing changed on the service; anything else
/// leaves the service state unknown.
fn phase_error(error: PollError) -> Outcome {
    match error {
        PollError::Rejected(error) => Outcome::RolloutFailed {
            reason: error.to_string(),
            deployment_id: None,
        },
        other => Outcome::timeout(Phase::Rollout, other.into_timeout_cause()),
    }
}

/// Judge one observation of the service against the deployment being tracked.
fn judge(snapshot: &ServiceSnapshot, target: &DeploymentId) -> Probe<Outcome> {
    if snapshot.is_settled_on(target) {
        return Probe::Ready(Outcome::Success);
    }

    let Some(deployment) = snapshot.deployment(target) else {
        return Probe::Ready(Outcome::RolloutFailed {
            reason: format!("deployment {target} is no longer part of the service"),
            deployment_id: Some(target.clone()),
        });
    };

    if deployment.rollout_state == Some(RolloutState::Failed) {
        return Probe::Ready(Outcome::RolloutFailed {
            reason: deployment
                .rollout_state_reason
                .clone()
                .unwrap_or_else(|| "deployment failed".to_owned()),
            deployment_id: Some(target.clone()),
        });
    }

    if deployment.status != DeploymentStatus::Primary {
        let newer = snapshot
            .primary()
            .map_or_else(|| "another deployment".to_owned(), |d| d.id.to_string());
        return Probe::Ready(Outcome::RolloutFailed {
            reason: format!("deployment {target} was superseded by {newer}"),
            deployment_id: Some(target.clone()),
        });
    }

    debug!(
        deployment = %target,
        desired = deployment.desired_count,
        running = deployment.running_count,
        pending = deployment.pending_count,
        draining = snapshot.deployments.len().saturating_sub(1),
        "rollout in progress"
    );
    Probe::Pending
}

fn report(poller: &Poller, outcome: Outcome, resource: Option<String>) -> PhaseReport {
    PhaseReport {
        phase: Phase::Rollout,
        outcome,
        elapsed: poller.elapsed(),
        resource,
    }
}
