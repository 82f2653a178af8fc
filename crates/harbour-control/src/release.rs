//! Release orchestration.
//!
//! A release moves through its phases as a typestate: a `Release<Rolling>`
//! can only be obtained from a `Release<Migrating>` whose migration
//! succeeded, so a rollout without a successful migration does not compile.
//!
//! ```text
//! Migrating ──(exit 0)──▶ Rolling ──▶ DeployReport
//!     │
//!     └──(failed / timeout)──▶ DeployReport
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use harbour_secrets::SecretsProvider;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Timing;
use crate::control_plane::ControlPlane;
use crate::error::ControlResult;
use crate::migration::MigrationRunner;
use crate::outcome::{DeployReport, Outcome, PhaseReport};
use crate::rollout::RolloutController;
use crate::types::Environment;

/// Marker trait for release stages.
pub trait ReleaseStage: private::Sealed + Send + Sync {
    /// Stage name for logs.
    fn name() -> &'static str;
}

mod private {
    pub trait Sealed {}
}

/// Migration task not yet run to completion.
#[derive(Debug, Clone, Copy)]
pub struct Migrating;

/// Migration succeeded; the service may be rolled.
#[derive(Debug, Clone, Copy)]
pub struct Rolling;

impl private::Sealed for Migrating {}
impl private::Sealed for Rolling {}

impl ReleaseStage for Migrating {
    fn name() -> &'static str {
        "migrating"
    }
}

impl ReleaseStage for Rolling {
    fn name() -> &'static str {
        "rolling"
    }
}

#[derive(Debug)]
struct ReleaseData {
    environment: Environment,
    task_definition: String,
    started_at: DateTime<Utc>,
    started: Instant,
    phases: Vec<PhaseReport>,
}

/// A release in a specific stage.
#[derive(Debug)]
pub struct Release<S: ReleaseStage> {
    data: ReleaseData,
    _stage: PhantomData<S>,
}

/// What follows the migration phase.
#[derive(Debug)]
pub enum Transition {
    /// Migration succeeded; roll the service next.
    Continue(Release<Rolling>),
    /// The release ended during migration.
    Finished(DeployReport),
}

impl<S: ReleaseStage> Release<S> {
    /// Target environment.
    #[must_use]
    pub const fn environment(&self) -> &Environment {
        &self.data.environment
    }

    /// Task definition the migration runs from.
    #[must_use]
    pub fn task_definition(&self) -> &str {
        &self.data.task_definition
    }

    /// Phases completed so far.
    #[must_use]
    pub fn phases(&self) -> &[PhaseReport] {
        &self.data.phases
    }

    /// Current stage name.
    #[must_use]
    pub fn stage_name(&self) -> &'static str {
        S::name()
    }

    fn transition<T: ReleaseStage>(self) -> Release<T> {
        Release {
            data: self.data,
            _stage: PhantomData,
        }
    }

    fn finish(self, outcome: Outcome) -> DeployReport {
        let data = self.data;
        DeployReport {
            environment: data.environment.name,
            started_at: data.started_at,
            elapsed: data.started.elapsed(),
            definitive: outcome.is_definitive(),
            outcome,
            phases: data.phases,
        }
    }
}

impl Release<Migrating> {
    /// Begin a release.
    #[must_use]
    pub fn start(environment: Environment, task_definition: impl Into<String>) -> Self {
        Self {
            data: ReleaseData {
                environment,
                task_definition: task_definition.into(),
                started_at: Utc::now(),
                started: Instant::now(),
                phases: Vec::with_capacity(2),
            },
            _stage: PhantomData,
        }
    }

    /// Run the migration phase.
    pub async fn migrate(
        mut self,
        runner: &MigrationRunner<'_>,
        cancel: &CancellationToken,
    ) -> ControlResult<Transition> {
        let report = runner
            .run(&self.data.environment, &self.data.task_definition, cancel)
            .await?;
        let outcome = report.outcome.clone();
        self.data.phases.push(report);

        if outcome.is_success() {
            Ok(Transition::Continue(self.transition()))
        } else {
            Ok(Transition::Finished(self.finish(outcome)))
        }
    }
}

impl Release<Rolling> {
    /// Run the rollout phase and close the release.
    pub async fn roll_out(
        mut self,
        controller: &RolloutController<'_>,
        cancel: &CancellationToken,
    ) -> DeployReport {
        let report = controller.run(&self.data.environment, cancel).await;
        let outcome = report.outcome.clone();
        self.data.phases.push(report);
        self.finish(outcome)
    }
}

/// Request to release to one environment.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Resolved target environment.
    pub environment: Environment,
    /// Task definition to migrate from; the environment's family when unset.
    pub task_definition: Option<String>,
}

impl DeployRequest {
    /// Release the environment's latest task definition.
    #[must_use]
    pub const fn new(environment: Environment) -> Self {
        Self {
            environment,
            task_definition: None,
        }
    }

    /// Pin the task definition to migrate from.
    #[must_use]
    pub fn with_task_definition(mut self, task_definition: impl Into<String>) -> Self {
        self.task_definition = Some(task_definition.into());
        self
    }
}

/// Drives releases against a control plane.
pub struct Orchestrator {
    control_plane: Arc<dyn ControlPlane>,
    secrets: SecretsProvider,
    timing: Timing,
}

impl Orchestrator {
    /// Create an orchestrator.
    pub fn new(control_plane: Arc<dyn ControlPlane>, secrets: SecretsProvider, timing: Timing) -> Self {
        Self {
            control_plane,
            secrets,
            timing,
        }
    }

    /// Timing in effect for releases.
    #[must_use]
    pub const fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Migrate, then roll out, stopping at the first phase that does not
    /// succeed.
    ///
    /// Every release ends in a [`DeployReport`]; an `Err` means the release
    /// could not be started at all.
    pub async fn deploy(
        &self,
        request: &DeployRequest,
        cancel: &CancellationToken,
    ) -> ControlResult<DeployReport> {
        let environment = &request.environment;
        let task_definition = request
            .task_definition
            .clone()
            .unwrap_or_else(|| environment.default_task_definition().to_owned());

        info!(
            environment = %environment.name,
            service = %environment.service,
            task_definition = %task_definition,
            "starting release"
        );

        let release = Release::start(environment.clone(), task_definition);
        let runner = MigrationRunner::new(self.control_plane.as_ref(), &self.secrets, &self.timing);

        let report = match release.migrate(&runner, cancel).await? {
            Transition::Finished(report) => report,
            Transition::Continue(release) => {
                let controller = RolloutController::new(self.control_plane.as_ref(), &self.timing);
                release.roll_out(&controller, cancel).await
            }
        };

        if report.outcome.is_success() {
            info!(
                environment = %report.environment,
                elapsed_ms = report.elapsed.as_millis(),
                "release complete"
            );
        } else {
            warn!(
                environment = %report.environment,
                outcome = %report.outcome,
                definitive = report.definitive,
                "release did not complete"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::control_plane::{FakeControlPlane, TaskStep};
    use crate::outcome::Phase;
    use crate::types::{MigrationTask, TaskPlacement};

    fn environment() -> Environment {
        Environment {
            name: "staging".to_owned(),
            cluster: "shop-staging".to_owned(),
            service: "shop-web".to_owned(),
            task_family: "shop-web".to_owned(),
            migration: MigrationTask {
                container: "web".to_owned(),
                command: vec!["bin/migrate".to_owned()],
                placement: TaskPlacement::default(),
                connection_secret: None,
                connection_env: "DATABASE_URL".to_owned(),
            },
        }
    }

    #[test]
    fn release_starts_migrating() {
        let release = Release::start(environment(), "shop-web:4");
        assert_eq!(release.stage_name(), "migrating");
        assert_eq!(release.task_definition(), "shop-web:4");
        assert!(release.phases().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_migration_finishes_release() {
        let fake = FakeControlPlane::new().with_task_steps([TaskStep::Exited(1)]);
        let secrets = SecretsProvider::default();
        let timing = Timing::default();
        let runner = MigrationRunner::new(&fake, &secrets, &timing);

        let transition = Release::start(environment(), "shop-web")
            .migrate(&runner, &CancellationToken::new())
            .await
            .unwrap();

        let Transition::Finished(report) = transition else {
            panic!("a failed migration must not continue to rollout");
        };
        assert!(report.definitive);
        assert!(report.phase(Phase::Rollout).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_migration_continues() {
        let fake = FakeControlPlane::new();
        let secrets = SecretsProvider::default();
        let timing = Timing::default();
        let runner = MigrationRunner::new(&fake, &secrets, &timing);

        let transition = Release::start(environment(), "shop-web")
            .migrate(&runner, &CancellationToken::new())
            .await
            .unwrap();

        let Transition::Continue(release) = transition else {
            panic!("expected rollout to follow");
        };
        assert_eq!(release.stage_name(), "rolling");
        assert_eq!(release.phases().len(), 1);
    }
}
