//! AWS Systems Manager Parameter Store backend.
//!
//! Secrets are addressed by path. With the default empty prefix an
//! environment-scoped secret `database-url` for project `shop` in `prod`
//! lives at `/shop/prod/database-url`.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_ssm::error::DisplayErrorContext;
use aws_sdk_ssm::Client;

use crate::error::SecretsError;
use crate::traits::SecretsBackend;
use crate::types::{SecretScope, SecretValue};

/// Parameter Store secrets backend.
///
/// `SecureString` parameters are always requested with decryption.
#[derive(Debug, Clone)]
pub struct ParameterStoreSecrets {
    client: Client,
    prefix: String,
}

impl ParameterStoreSecrets {
    /// Creates a backend from an already-loaded AWS configuration.
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
            prefix: String::new(),
        }
    }

    /// Creates a backend using the default AWS credential chain.
    pub async fn from_env(region: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_owned()));
        }
        Self::new(&loader.load().await)
    }

    /// Places every parameter under a path prefix such as `/harbour`.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into().trim_end_matches('/').to_owned();
        self
    }

    /// Builds the full parameter path for a secret at a scope.
    pub(crate) fn parameter_name(&self, scope: &SecretScope, name: &str) -> String {
        let mut path = self.prefix.clone();
        for segment in scope.segments() {
            path.push('/');
            path.push_str(segment);
        }
        path.push('/');
        path.push_str(name.trim_start_matches('/'));
        path
    }
}

#[async_trait]
impl SecretsBackend for ParameterStoreSecrets {
    async fn get_at_scope(
        &self,
        name: &str,
        scope: &SecretScope,
    ) -> Result<Option<SecretValue>, SecretsError> {
        let parameter = self.parameter_name(scope, name);

        let result = self
            .client
            .get_parameter()
            .name(&parameter)
            .with_decryption(true)
            .send()
            .await;

        match result {
            Ok(output) => Ok(output
                .parameter()
                .and_then(|p| p.value())
                .map(SecretValue::new)),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_parameter_not_found() {
                    tracing::trace!(parameter = %parameter, "parameter not found");
                    Ok(None)
                } else {
                    Err(SecretsError::Backend(format!(
                        "failed to read parameter {parameter}: {}",
                        DisplayErrorContext(&service_err)
                    )))
                }
            }
        }
    }
}
