//! Release outcomes and reports.
//!
//! Every release ends in exactly one [`Outcome`]. The taxonomy separates
//! outcomes that are definitely settled (success, migration failed, rollout
//! failed) from timeouts, where the remote work may still be running and an
//! operator has to look.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::types::{DeploymentId, TaskId};

/// A phase of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Running the one-off migration task.
    Migration,
    /// Rolling the long-running service.
    Rollout,
}

impl Phase {
    /// Get the phase name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Migration => "migration",
            Self::Rollout => "rollout",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a phase stopped waiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum TimeoutCause {
    /// The phase max-wait elapsed before a terminal state was observed.
    Elapsed,
    /// The control plane kept failing; the remote state is unknown.
    ControlPlane {
        /// Consecutive failed calls.
        attempts: u32,
        /// The last error seen.
        error: String,
    },
    /// An operator interrupted the release.
    Cancelled,
}

impl fmt::Display for TimeoutCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elapsed => f.write_str("max wait elapsed"),
            Self::ControlPlane { attempts, error } => {
                write!(f, "control plane failed {attempts} time(s): {error}")
            }
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Final result of a release, or of one of its phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    /// The phase (or the whole release) completed.
    Success,

    /// The migration task stopped without a zero exit code, or never started.
    MigrationFailed {
        /// Container exit code; absent if the container never ran to
        /// completion.
        exit_code: Option<i32>,
        /// Platform explanation, when one was given.
        reason: Option<String>,
        /// The task that failed, if one was launched.
        task_id: Option<TaskId>,
    },

    /// The service deployment failed.
    RolloutFailed {
        /// Platform explanation.
        reason: String,
        /// The deployment that failed, if known.
        deployment_id: Option<DeploymentId>,
    },

    /// A phase stopped waiting before reaching a terminal state.
    Timeout {
        /// The phase that timed out.
        phase: Phase,
        /// Why it stopped waiting.
        #[serde(flatten)]
        cause: TimeoutCause,
    },
}

impl Outcome {
    /// Returns true for [`Outcome::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if the outcome reflects a settled remote state.
    ///
    /// Timeouts are never definitive: the task or rollout may still be
    /// running.
    #[must_use]
    pub const fn is_definitive(&self) -> bool {
        !matches!(self, Self::Timeout { .. })
    }

    /// Create a timeout outcome.
    #[must_use]
    pub const fn timeout(phase: Phase, cause: TimeoutCause) -> Self {
        Self::Timeout { phase, cause }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::MigrationFailed {
                exit_code,
                reason,
                task_id,
            } => {
                f.write_str("migration failed")?;
                match exit_code {
                    Some(code) => write!(f, " with exit code {code}")?,
                    None => f.write_str(" without an exit code")?,
                }
                if let Some(task_id) = task_id {
                    write!(f, " (task {})", task_id.short())?;
                }
                if let Some(reason) = reason {
                    write!(f, ": {reason}")?;
                }
                Ok(())
            }
            Self::RolloutFailed {
                reason,
                deployment_id,
            } => {
                f.write_str("rollout failed")?;
                if let Some(id) = deployment_id {
                    write!(f, " (deployment {id})")?;
                }
                write!(f, ": {reason}")
            }
            Self::Timeout { phase, cause } => {
                write!(f, "{phase} timed out ({cause}); remote state unknown")
            }
        }
    }
}

/// Summary of one phase of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    /// The phase.
    pub phase: Phase,
    /// How the phase ended.
    pub outcome: Outcome,
    /// Wall-clock time spent in the phase.
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// Task or deployment the phase acted on, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

/// Full account of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    /// Environment released to.
    pub environment: String,
    /// When the release started.
    pub started_at: DateTime<Utc>,
    /// Total wall-clock time.
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// Final outcome.
    pub outcome: Outcome,
    /// Whether the outcome reflects a settled remote state.
    pub definitive: bool,
    /// Per-phase detail, in execution order.
    pub phases: Vec<PhaseReport>,
}

impl DeployReport {
    /// Report for a given phase, if the release reached it.
    #[must_use]
    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == phase)
    }
}

impl fmt::Display for DeployReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "release to {}: {} after {:.1}s",
            self.environment,
            self.outcome,
            self.elapsed.as_secs_f64()
        )?;
        for phase in &self.phases {
            write!(
                f,
                "  {:<9} {} ({:.1}s)",
                phase.phase.as_str(),
                phase.outcome,
                phase.elapsed.as_secs_f64()
            )?;
            if let Some(resource) = &phase.resource {
                write!(f, " [{resource}]")?;
            }
            writeln!(f)?;
        }
        if !self.definitive {
            writeln!(
                f,
                "  the remote work may still be running; check the cluster before re-running"
            )?;
        }
        Ok(())
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
