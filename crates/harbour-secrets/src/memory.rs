//! In-memory secrets backend for tests and dry runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::SecretsError;
use crate::traits::SecretsBackend;
use crate::types::{SecretScope, SecretValue};

/// Storage key combining scope and name.
fn storage_key(scope: &SecretScope, name: &str) -> String {
    format!("{}:{}", scope.to_key(), name)
}

/// In-memory secrets backend.
///
/// Values are seeded with [`MemorySecrets::insert`] and are not persisted
/// across restarts.
#[derive(Debug, Clone, Default)]
pub struct MemorySecrets {
    data: Arc<RwLock<HashMap<String, SecretValue>>>,
}

impl MemorySecrets {
    /// Creates a new, empty in-memory secrets backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a secret at the given scope, replacing any previous value.
    pub async fn insert(&self, name: &str, value: SecretValue, scope: &SecretScope) {
        let mut data = self.data.write().await;
        data.insert(storage_key(scope, name), value);

        tracing::debug!(
            secret.name = name,
            secret.scope = %scope,
            "secret stored in memory"
        );
    }
}

#[async_trait]
impl SecretsBackend for MemorySecrets {
    async fn get_at_scope(
        &self,
        name: &str,
        scope: &SecretScope,
    ) -> Result<Option<SecretValue>, SecretsError> {
        let data = self.data.read().await;
        Ok(data.get(&storage_key(scope, name)).cloned())
    }
}
