//! Environment variable secrets backend.
//!
//! Reads secrets from environment variables. This is mainly for local runs
//! and CI jobs that already export the connection string.

use std::env;

use async_trait::async_trait;

use crate::error::SecretsError;
use crate::traits::SecretsBackend;
use crate::types::{SecretContext, SecretScope, SecretValue};

/// Default environment variable prefix.
pub(crate) const DEFAULT_PREFIX: &str = "HARBOUR_SECRET";

/// Environment variable secrets backend.
///
/// # Variable Naming
///
/// Secrets are read from variables named `{PREFIX}_{NAME}`, where the name is
/// upper-cased and `-`, `.` and `/` are replaced with `_`:
/// - `database-url` → `HARBOUR_SECRET_DATABASE_URL` (with default prefix)
/// - `db.password` → `MYAPP_DB_PASSWORD` (with `MYAPP` prefix)
///
/// # Limitations
///
/// - **No scoping**: All secrets are effectively global
/// - **Process-wide**: The values are visible to anything that can read the
///   process environment
#[derive(Debug, Clone)]
pub struct EnvSecrets {
    prefix: String,
}

impl Default for EnvSecrets {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvSecrets {
    /// Creates a new environment secrets backend with the default prefix.
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_PREFIX)
    }

    /// Creates a new environment secrets backend with a custom prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Returns the configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Constructs the environment variable name for a secret.
    fn env_var_name(&self, name: &str) -> String {
        let normalised: String = name
            .chars()
            .map(|c| match c {
                '-' | '.' | '/' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();

        if self.prefix.is_empty() {
            normalised
        } else {
            format!("{}_{}", self.prefix, normalised)
        }
    }
}

#[async_trait]
impl SecretsBackend for EnvSecrets {
    async fn get_at_scope(
        &self,
        name: &str,
        _scope: &SecretScope,
    ) -> Result<Option<SecretValue>, SecretsError> {
        let var_name = self.env_var_name(name);

        match env::var(&var_name) {
            Ok(value) => {
                tracing::debug!(
                    secret.name = name,
                    secret.env_var = %var_name,
                    "secret read from environment"
                );
                Ok(Some(SecretValue::new(value)))
            }
            Err(env::VarError::NotPresent) => Ok(None),
            Err(env::VarError::NotUnicode(_)) => {
                tracing::warn!(
                    secret.name = name,
                    secret.env_var = %var_name,
                    "environment variable contains invalid UTF-8"
                );
                Err(SecretsError::backend(format!("{var_name} is not valid UTF-8")))
            }
        }
    }

    async fn get(
        &self,
        name: &str,
        _context: &SecretContext,
    ) -> Result<Option<SecretValue>, SecretsError> {
        // Every scope maps onto the same variable.
        self.get_at_scope(name, &SecretScope::global()).await
    }
}
