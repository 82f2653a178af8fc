//! Harbour release control.
//!
//! This crate releases a containerised service in two ordered phases:
//!
//! 1. **Migration**: run the environment's one-off migration task and wait
//!    for it to stop. Only a zero exit code from the migration container
//!    lets the release continue.
//! 2. **Rollout**: force a new deployment of the long-running service (or
//!    follow one already underway) and wait until it runs only the new
//!    deployment at its desired count.
//!
//! Every control-plane call is bounded by a per-request timeout, each phase
//! by its own max-wait, and the whole release can be cancelled.
//!
//! # Outcomes
//!
//! A release ends in exactly one [`Outcome`]:
//!
//! ```text
//! Success | MigrationFailed | RolloutFailed | Timeout(phase, cause)
//! ```
//!
//! Timeouts are never definitive: the remote task or deployment may still be
//! running when the release gives up on it.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use harbour_control::{ControlConfig, DeployRequest, EcsControlPlane, Orchestrator};
//!
//! let config = ControlConfig::load()?;
//! let sdk = harbour_control::load_sdk_config(&config.aws).await;
//! let orchestrator = Orchestrator::new(
//!     Arc::new(EcsControlPlane::new(&sdk)),
//!     secrets,
//!     config.timing(),
//! );
//! let request = DeployRequest::new(config.environment("staging")?);
//! let report = orchestrator.deploy(&request, &cancel).await?;
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod control_plane;
pub mod error;
pub mod migration;
pub mod outcome;
pub mod poll;
pub mod release;
pub mod rollout;
pub mod types;

pub use config::{ControlConfig, Timing};
pub use control_plane::{load_sdk_config, ControlPlane, EcsControlPlane, FakeControlPlane};
pub use error::{ControlError, ControlPlaneError, ControlResult};
pub use outcome::{DeployReport, Outcome, Phase, PhaseReport, TimeoutCause};
pub use release::{DeployRequest, Orchestrator, Release};
pub use types::{Environment, MigrationTask, TaskPlacement};
