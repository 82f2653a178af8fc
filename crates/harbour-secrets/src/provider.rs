//! Provider factory for secrets backends.

use std::sync::Arc;

use crate::config::SecretsConfig;
use crate::error::SecretsError;
use crate::memory::MemorySecrets;
use crate::traits::SecretsBackend;
use crate::types::{SecretContext, SecretValue};

#[cfg(feature = "env")]
use crate::env::EnvSecrets;

#[cfg(feature = "ssm")]
use crate::parameter_store::ParameterStoreSecrets;

/// A secrets backend bound to a resolution context.
///
/// The release orchestrator holds one provider per run, scoped to the
/// project and environment being deployed.
#[derive(Clone, Default)]
#[must_use]
pub struct SecretsProvider {
    backend: Option<Arc<dyn SecretsBackend>>,
    context: SecretContext,
}

impl SecretsProvider {
    /// Creates a new empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider from configuration.
    pub async fn from_config(config: &SecretsConfig) -> Result<Self, SecretsError> {
        let backend = Self::create_backend(config).await?;

        tracing::debug!(backend = config.backend_name(), "secrets backend created");

        Ok(Self {
            backend: Some(backend),
            context: SecretContext::default(),
        })
    }

    /// Sets the backend for this provider.
    pub fn with_backend(mut self, backend: Arc<dyn SecretsBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Sets the context for this provider.
    pub fn with_context(mut self, context: SecretContext) -> Self {
        self.context = context;
        self
    }

    /// Returns the configured backend.
    pub fn backend(&self) -> Result<Arc<dyn SecretsBackend>, SecretsError> {
        self.backend.clone().ok_or(SecretsError::NotConfigured)
    }

    /// Returns the configured context.
    pub const fn context(&self) -> &SecretContext {
        &self.context
    }

    /// Resolves a secret that must exist.
    ///
    /// Searches the provider's context and fails with
    /// [`SecretsError::NotFound`] when no scope holds the secret.
    pub async fn require(&self, name: &str) -> Result<SecretValue, SecretsError> {
        self.backend()?
            .get(name, &self.context)
            .await?
            .ok_or_else(|| SecretsError::not_found(name))
    }

    async fn create_backend(config: &SecretsConfig) -> Result<Arc<dyn SecretsBackend>, SecretsError> {
        match config {
            SecretsConfig::Memory => Ok(Arc::new(MemorySecrets::new())),

            #[cfg(feature = "env")]
            SecretsConfig::Env { prefix } => Ok(Arc::new(EnvSecrets::with_prefix(prefix))),

            #[cfg(feature = "ssm")]
            SecretsConfig::Ssm { prefix, region } => {
                let backend = ParameterStoreSecrets::from_env(region.as_deref())
                    .await
                    .with_prefix(prefix.as_str());
                Ok(Arc::new(backend))
            }
        }
    }
}

impl std::fmt::Debug for SecretsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsProvider")
            .field("backend", &self.backend.is_some())
            .field("context", &self.context)
            .finish()
    }
}
