//! Error types for secrets resolution.

use thiserror::Error;

/// Errors raised while resolving a secret.
///
/// Messages name secrets but never carry their values.
#[derive(Debug, Error)]
pub enum SecretsError {
    /// No scope holds the secret.
    #[error("secret not found: {name}")]
    NotFound {
        /// Secret name.
        name: String,
    },

    /// The provider has no backend.
    #[error("secrets backend not configured")]
    NotConfigured,

    /// The backend failed to answer, or returned something unusable.
    #[error("backend error: {0}")]
    Backend(String),
}

impl SecretsError {
    /// Create a not-found error for the named secret.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Create a backend error.
    #[must_use]
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}
