//! Traits for secrets backend implementations.

use async_trait::async_trait;

use crate::error::SecretsError;
use crate::types::{SecretContext, SecretScope, SecretValue};

/// Backend trait for secrets lookup.
///
/// Backends are read-only from Harbour's point of view: secret lifecycle is
/// owned by whoever provisions the environment.
///
/// # Scope Resolution
///
/// The `get` method with a `SecretContext` searches scopes in order from most
/// specific to least specific:
/// 1. Environment scope (project + environment)
/// 2. Project scope
/// 3. Global scope
#[async_trait]
pub trait SecretsBackend: Send + Sync {
    /// Retrieves a secret at a specific scope.
    ///
    /// This does not perform scope resolution; it only searches the exact
    /// scope specified.
    async fn get_at_scope(
        &self,
        name: &str,
        scope: &SecretScope,
    ) -> Result<Option<SecretValue>, SecretsError>;

    /// Retrieves a secret, searching through scopes based on the context.
    ///
    /// Returns the first matching secret found in the resolution order, or
    /// `None` if the secret is not found at any scope.
    async fn get(
        &self,
        name: &str,
        context: &SecretContext,
    ) -> Result<Option<SecretValue>, SecretsError> {
        for scope in context.resolution_order() {
            if let Some(value) = self.get_at_scope(name, &scope).await? {
                tracing::debug!(
                    secret.name = name,
                    secret.scope = %scope,
                    "secret resolved"
                );
                return Ok(Some(value));
            }
        }

        Ok(None)
    }

    /// Checks if a secret exists, searching through scopes based on context.
    async fn exists(&self, name: &str, context: &SecretContext) -> Result<bool, SecretsError> {
        Ok(self.get(name, context).await?.is_some())
    }
}
