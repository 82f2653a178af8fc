//! Error types for harbour-control.

use std::time::Duration;

use harbour_secrets::SecretsError;

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that prevent a release from starting.
///
/// These sit outside the release outcome taxonomy: a release that fails with
/// a `ControlError` never reached the control plane in a way that matters.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The requested environment is not configured.
    #[error("unknown environment: {name} (configured: {known})")]
    UnknownEnvironment {
        /// Requested environment name.
        name: String,
        /// Comma-separated configured environment names.
        known: String,
    },

    /// A secret needed by the release could not be resolved.
    #[error("secrets error: {0}")]
    Secrets(#[from] SecretsError),
}

impl ControlError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Errors returned by a single control-plane call.
///
/// Transient errors are retried by the poller; everything else means the
/// platform understood the request and refused it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlPlaneError {
    /// The call did not complete within its own timeout budget.
    #[error("control plane call timed out after {0:?}")]
    Timeout(Duration),

    /// The platform asked us to slow down.
    #[error("control plane throttled the request: {0}")]
    Throttled(String),

    /// Network failure or server-side error.
    #[error("control plane unavailable: {0}")]
    Unavailable(String),

    /// The platform rejected the request.
    #[error("control plane rejected the request: {0}")]
    Rejected(String),

    /// The addressed cluster, service or task does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ControlPlaneError {
    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a rejected error.
    #[must_use]
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Throttled(_) | Self::Unavailable(_)
        )
    }
}
