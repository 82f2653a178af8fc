//! Common test utilities for release integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use harbour_control::control_plane::FakeControlPlane;
use harbour_control::{
    ControlResult, DeployReport, DeployRequest, Environment, MigrationTask, Orchestrator,
    TaskPlacement, Timing,
};
use harbour_secrets::{MemorySecrets, SecretContext, SecretScope, SecretValue, SecretsProvider};
use tokio_util::sync::CancellationToken;

pub const CLUSTER: &str = "shop-staging";
pub const SERVICE: &str = "shop-web";
pub const CONTAINER: &str = "web";

pub const MIGRATION_MAX_WAIT: Duration = Duration::from_secs(60);
pub const ROLLOUT_MAX_WAIT: Duration = Duration::from_secs(120);

/// Short timings so paused-clock tests stay readable.
pub fn timing() -> Timing {
    Timing {
        interval: Duration::from_secs(5),
        request_timeout: Duration::from_secs(10),
        max_consecutive_errors: 3,
        initial_backoff: Duration::from_millis(500),
        max_backoff: Duration::from_secs(4),
        migration_max_wait: MIGRATION_MAX_WAIT,
        rollout_max_wait: ROLLOUT_MAX_WAIT,
    }
}

pub fn environment() -> Environment {
    Environment {
        name: "staging".to_owned(),
        cluster: CLUSTER.to_owned(),
        service: SERVICE.to_owned(),
        task_family: "shop-web".to_owned(),
        migration: MigrationTask {
            container: CONTAINER.to_owned(),
            command: vec!["bin/migrate".to_owned()],
            placement: TaskPlacement {
                subnets: vec!["subnet-a".to_owned()],
                ..TaskPlacement::default()
            },
            connection_secret: None,
            connection_env: "DATABASE_URL".to_owned(),
        },
    }
}

/// A service that deploys cleanly from `d1` to `d2`.
pub fn clean_rollout(fake: FakeControlPlane) -> FakeControlPlane {
    fake.with_service_steps([
        Ok(FakeControlPlane::stable(SERVICE, "d1", 2)),
        Ok(FakeControlPlane::rolling(SERVICE, "d2", "d1", 2, 1)),
        Ok(FakeControlPlane::stable(SERVICE, "d2", 2)),
    ])
    .with_force_results([Ok(FakeControlPlane::rolling(SERVICE, "d2", "d1", 2, 0))])
}

/// Orchestrator wired to a fake control plane.
pub struct TestRelease {
    pub fake: Arc<FakeControlPlane>,
    pub orchestrator: Orchestrator,
    pub environment: Environment,
}

impl TestRelease {
    pub fn new(fake: FakeControlPlane) -> Self {
        Self::with_secrets(fake, SecretsProvider::new(), environment())
    }

    pub fn with_secrets(
        fake: FakeControlPlane,
        secrets: SecretsProvider,
        environment: Environment,
    ) -> Self {
        let fake = Arc::new(fake);
        let orchestrator = Orchestrator::new(fake.clone(), secrets, timing());
        Self {
            fake,
            orchestrator,
            environment,
        }
    }

    pub async fn deploy(&self) -> ControlResult<DeployReport> {
        self.deploy_with(&CancellationToken::new()).await
    }

    pub async fn deploy_with(&self, cancel: &CancellationToken) -> ControlResult<DeployReport> {
        let request = DeployRequest::new(self.environment.clone());
        self.orchestrator.deploy(&request, cancel).await
    }
}

/// A provider holding `database-url` for the staging environment.
pub async fn secrets_with_database_url() -> SecretsProvider {
    let backend = MemorySecrets::new();
    backend
        .insert(
            "database-url",
            SecretValue::new("postgres://migrator:s3cret@db/shop"),
            &SecretScope::environment("shop", "staging"),
        )
        .await;

    SecretsProvider::new()
        .with_backend(Arc::new(backend))
        .with_context(SecretContext::new().with_project("shop").with_environment("staging"))
}
