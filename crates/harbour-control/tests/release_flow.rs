//! Integration tests for the migrate-then-roll-out release flow.

mod common;

use std::time::Duration;

use common::{
    clean_rollout, environment, secrets_with_database_url, TestRelease, MIGRATION_MAX_WAIT,
    ROLLOUT_MAX_WAIT, SERVICE,
};
use harbour_control::control_plane::{Call, FakeControlPlane, TaskStep};
use harbour_control::types::DeploymentId;
use harbour_control::{ControlError, ControlPlaneError, Outcome, Phase, TimeoutCause};
use harbour_secrets::{SecretsError, SecretsProvider};
use rstest::rstest;
use tokio_util::sync::CancellationToken;

fn position(calls: &[Call], predicate: impl Fn(&Call) -> bool) -> Option<usize> {
    calls.iter().position(predicate)
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn successful_release_migrates_before_rolling_out() {
    let release = TestRelease::new(clean_rollout(FakeControlPlane::new().with_task_steps([
        TaskStep::Pending,
        TaskStep::Running,
        TaskStep::Exited(0),
    ])));

    let report = release.deploy().await.unwrap();

    assert_eq!(report.outcome, Outcome::Success);
    assert!(report.definitive);
    assert_eq!(report.phases.len(), 2);
    assert_eq!(report.phases[0].phase, Phase::Migration);
    assert_eq!(report.phases[1].phase, Phase::Rollout);
    assert_eq!(report.phases[1].resource.as_deref(), Some("d2"));

    let calls = release.fake.calls();
    let last_task_call = calls
        .iter()
        .rposition(|c| matches!(c, Call::RunTask { .. } | Call::DescribeTask { .. }))
        .unwrap();
    let first_service_call = position(&calls, |c| {
        matches!(
            c,
            Call::DescribeService { .. } | Call::ForceNewDeployment { .. }
        )
    })
    .unwrap();
    assert!(last_task_call < first_service_call);
    assert_eq!(release.fake.force_count(), 1);
    assert_eq!(release.fake.tasks_started(), 1);
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(137)]
#[tokio::test(start_paused = true)]
async fn failed_migration_never_touches_the_service(#[case] exit_code: i32) {
    let release = TestRelease::new(clean_rollout(
        FakeControlPlane::new().with_task_steps([TaskStep::Running, TaskStep::Exited(exit_code)]),
    ));

    let report = release.deploy().await.unwrap();

    let Outcome::MigrationFailed {
        exit_code: reported,
        task_id,
        ..
    } = &report.outcome
    else {
        panic!("expected migration failure, got {}", report.outcome);
    };
    assert_eq!(*reported, Some(exit_code));
    assert!(task_id.is_some());
    assert!(report.definitive);
    assert!(report.phase(Phase::Rollout).is_none());
    assert_eq!(release.fake.force_count(), 0);
    assert_eq!(release.fake.describe_service_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn task_stopped_without_exit_code_is_a_failure() {
    let release = TestRelease::new(clean_rollout(FakeControlPlane::new().with_task_steps([
        TaskStep::StoppedWithoutExit("CannotPullContainerError: image not found".to_owned()),
    ])));

    let report = release.deploy().await.unwrap();

    assert!(matches!(
        report.outcome,
        Outcome::MigrationFailed {
            exit_code: None,
            ..
        }
    ));
    assert_eq!(release.fake.force_count(), 0);
}

// ============================================================================
// Migration launch
// ============================================================================

#[tokio::test(start_paused = true)]
async fn rejected_launch_is_a_migration_failure() {
    let release = TestRelease::new(clean_rollout(
        FakeControlPlane::new().with_launch_rejection("RESOURCE:MEMORY"),
    ));

    let report = release.deploy().await.unwrap();

    assert_eq!(
        report.outcome,
        Outcome::MigrationFailed {
            exit_code: None,
            reason: Some("RESOURCE:MEMORY".to_owned()),
            task_id: None,
        }
    );
    assert!(report.definitive);
    assert_eq!(release.fake.tasks_started(), 0);
    assert_eq!(release.fake.describe_service_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn transient_launch_failures_reuse_the_client_token() {
    let release = TestRelease::new(clean_rollout(FakeControlPlane::new().with_launch_failures([
        ControlPlaneError::Throttled("Rate exceeded".to_owned()),
        ControlPlaneError::unavailable("connection reset"),
    ])));

    let report = release.deploy().await.unwrap();

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(release.fake.tasks_started(), 1);

    let tokens: Vec<_> = release
        .fake
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::RunTask { client_token, .. } => Some(client_token),
            _ => None,
        })
        .collect();
    assert_eq!(tokens.len(), 3);
    assert!(tokens.iter().all(|t| t == &tokens[0]));
}

#[tokio::test(start_paused = true)]
async fn connection_secret_is_injected_into_the_task() {
    let mut env = environment();
    env.migration.connection_secret = Some("database-url".to_owned());

    let release = TestRelease::with_secrets(
        clean_rollout(FakeControlPlane::new()),
        secrets_with_database_url().await,
        env,
    );

    let report = release.deploy().await.unwrap();
    assert_eq!(report.outcome, Outcome::Success);

    let calls = release.fake.calls();
    let Some(Call::RunTask { env_names, .. }) = calls.first() else {
        panic!("expected run_task first");
    };
    assert_eq!(env_names, &["DATABASE_URL".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn missing_secret_stops_before_any_call() {
    let mut env = environment();
    env.migration.connection_secret = Some("database-url".to_owned());

    let release = TestRelease::with_secrets(
        clean_rollout(FakeControlPlane::new()),
        SecretsProvider::new()
            .with_backend(std::sync::Arc::new(harbour_secrets::MemorySecrets::new())),
        env,
    );

    let err = release.deploy().await.unwrap_err();

    assert!(matches!(
        err,
        ControlError::Secrets(SecretsError::NotFound { .. })
    ));
    assert!(release.fake.calls().is_empty());
}

// ============================================================================
// Timeouts
// ============================================================================

#[tokio::test(start_paused = true)]
async fn migration_stuck_pending_times_out() {
    let release = TestRelease::new(clean_rollout(
        FakeControlPlane::new().with_task_steps([TaskStep::Pending]),
    ));

    let report = release.deploy().await.unwrap();

    assert_eq!(
        report.outcome,
        Outcome::timeout(Phase::Migration, TimeoutCause::Elapsed)
    );
    assert!(!report.definitive);
    assert_eq!(
        report.phase(Phase::Migration).unwrap().elapsed,
        MIGRATION_MAX_WAIT
    );
    assert_eq!(release.fake.describe_service_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn invisible_task_is_waited_on() {
    let release = TestRelease::new(clean_rollout(FakeControlPlane::new().with_task_steps([
        TaskStep::Invisible,
        TaskStep::Invisible,
        TaskStep::Exited(0),
    ])));

    let report = release.deploy().await.unwrap();

    assert_eq!(report.outcome, Outcome::Success);
}

#[tokio::test(start_paused = true)]
async fn persistent_describe_errors_time_out_with_control_plane_cause() {
    let release = TestRelease::new(clean_rollout(FakeControlPlane::new().with_task_steps([
        TaskStep::Error(ControlPlaneError::unavailable("503 Service Unavailable")),
    ])));

    let report = release.deploy().await.unwrap();

    let Outcome::Timeout {
        phase: Phase::Migration,
        cause: TimeoutCause::ControlPlane { attempts, .. },
    } = report.outcome
    else {
        panic!("expected control-plane timeout, got {}", report.outcome);
    };
    assert_eq!(attempts, 3);
    assert!(!report.definitive);
}

#[tokio::test(start_paused = true)]
async fn rollout_that_never_settles_times_out() {
    let release = TestRelease::new(FakeControlPlane::new().with_service_steps([
        Ok(FakeControlPlane::stable(SERVICE, "d1", 3)),
        Ok(FakeControlPlane::rolling(SERVICE, "d2", "d1", 3, 1)),
    ]));

    let report = release.deploy().await.unwrap();

    assert_eq!(
        report.outcome,
        Outcome::timeout(Phase::Rollout, TimeoutCause::Elapsed)
    );
    assert_eq!(
        report.phase(Phase::Migration).unwrap().outcome,
        Outcome::Success
    );
    assert_eq!(
        report.phase(Phase::Rollout).unwrap().elapsed,
        ROLLOUT_MAX_WAIT
    );
    assert_eq!(release.fake.force_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_reports_timeout_cancelled() {
    let release = TestRelease::new(clean_rollout(
        FakeControlPlane::new().with_task_steps([TaskStep::Running]),
    ));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        trigger.cancel();
    });

    let report = release.deploy_with(&cancel).await.unwrap();

    assert_eq!(
        report.outcome,
        Outcome::timeout(Phase::Migration, TimeoutCause::Cancelled)
    );
    assert!(!report.definitive);
    assert_eq!(release.fake.force_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_rolling_stops_without_forcing_again() {
    let release = TestRelease::new(FakeControlPlane::new().with_service_steps([
        Ok(FakeControlPlane::stable(SERVICE, "d1", 3)),
        Ok(FakeControlPlane::rolling(SERVICE, "d2", "d1", 3, 1)),
    ]));
    let cancel = CancellationToken::new();

    let fake = release.fake.clone();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        while fake.force_count() == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_secs(12)).await;
        trigger.cancel();
    });

    let report = release.deploy_with(&cancel).await.unwrap();

    assert_eq!(
        report.outcome,
        Outcome::timeout(Phase::Rollout, TimeoutCause::Cancelled)
    );
    assert!(!report.definitive);
    assert_eq!(
        report.phase(Phase::Migration).unwrap().outcome,
        Outcome::Success
    );
    let rollout = report.phase(Phase::Rollout).unwrap();
    assert!(rollout.elapsed < ROLLOUT_MAX_WAIT);
    assert_eq!(rollout.resource.as_deref(), Some("d2"));

    let polls = release.fake.describe_service_count();
    tokio::time::sleep(ROLLOUT_MAX_WAIT).await;
    assert_eq!(release.fake.force_count(), 1);
    assert_eq!(release.fake.describe_service_count(), polls);
}

// ============================================================================
// Rollout behaviour
// ============================================================================

#[tokio::test(start_paused = true)]
async fn rollout_in_progress_is_followed_not_forced() {
    let release = TestRelease::new(FakeControlPlane::new().with_service_steps([
        Ok(FakeControlPlane::rolling(SERVICE, "d2", "d1", 2, 1)),
        Ok(FakeControlPlane::stable(SERVICE, "d2", 2)),
    ]));

    let report = release.deploy().await.unwrap();

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(release.fake.force_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn rerun_after_failed_rollout_forces_a_fresh_deployment() {
    let release = TestRelease::new(
        FakeControlPlane::new()
            .with_service_steps([
                Ok(FakeControlPlane::failed(
                    SERVICE,
                    "d2",
                    "d1",
                    "ECS deployment circuit breaker: tasks failed to start",
                )),
                Ok(FakeControlPlane::rolling(SERVICE, "d3", "d1", 2, 1)),
                Ok(FakeControlPlane::stable(SERVICE, "d3", 2)),
            ])
            .with_force_results([Ok(FakeControlPlane::rolling(SERVICE, "d3", "d1", 2, 0))]),
    );

    let report = release.deploy().await.unwrap();

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(
        report.phase(Phase::Rollout).unwrap().resource.as_deref(),
        Some("d3")
    );
    assert_eq!(release.fake.force_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_rollout_state_is_reported() {
    let release = TestRelease::new(
        FakeControlPlane::new()
            .with_service_steps([
                Ok(FakeControlPlane::stable(SERVICE, "d1", 2)),
                Ok(FakeControlPlane::failed(
                    SERVICE,
                    "d2",
                    "d1",
                    "ECS deployment circuit breaker: tasks failed to start",
                )),
            ])
            .with_force_results([Ok(FakeControlPlane::rolling(SERVICE, "d2", "d1", 2, 0))]),
    );

    let report = release.deploy().await.unwrap();

    assert_eq!(
        report.outcome,
        Outcome::RolloutFailed {
            reason: "ECS deployment circuit breaker: tasks failed to start".to_owned(),
            deployment_id: Some(DeploymentId::new("d2")),
        }
    );
    assert!(report.definitive);
}

#[tokio::test(start_paused = true)]
async fn lost_force_response_does_not_force_twice() {
    let release = TestRelease::new(
        FakeControlPlane::new()
            .with_service_steps([
                Ok(FakeControlPlane::stable(SERVICE, "d1", 2)),
                Ok(FakeControlPlane::rolling(SERVICE, "d2", "d1", 2, 0)),
                Ok(FakeControlPlane::stable(SERVICE, "d2", 2)),
            ])
            .with_force_results([Err(ControlPlaneError::unavailable("connection reset"))]),
    );

    let report = release.deploy().await.unwrap();

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(release.fake.force_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn refused_force_is_a_rollout_failure() {
    let release = TestRelease::new(
        FakeControlPlane::new()
            .with_service_steps([Ok(FakeControlPlane::stable(SERVICE, "d1", 2))])
            .with_force_results([Err(ControlPlaneError::rejected(
                "AccessDeniedException: not authorized to perform ecs:UpdateService",
            ))]),
    );

    let report = release.deploy().await.unwrap();

    assert!(matches!(
        report.outcome,
        Outcome::RolloutFailed {
            deployment_id: None,
            ..
        }
    ));
    assert_eq!(release.fake.force_count(), 1);
}
