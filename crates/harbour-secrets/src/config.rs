//! Configuration types for secrets backends.

use serde::Deserialize;

/// Backend selection for secrets resolution.
///
/// Deserialised from a table tagged by `backend`:
///
/// ```toml
/// [secrets]
/// backend = "ssm"
/// prefix = "/harbour"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum SecretsConfig {
    /// In-memory backend, empty unless seeded programmatically.
    Memory,

    /// Environment variable backend.
    #[cfg(feature = "env")]
    Env {
        /// Environment variable prefix (default: `HARBOUR_SECRET`).
        #[serde(default = "default_env_prefix")]
        prefix: String,
    },

    /// AWS SSM Parameter Store backend.
    #[cfg(feature = "ssm")]
    Ssm {
        /// Path prefix prepended to every parameter name.
        #[serde(default)]
        prefix: String,
        /// Region override; the default AWS chain applies when unset.
        #[serde(default)]
        region: Option<String>,
    },
}

#[cfg(feature = "env")]
impl Default for SecretsConfig {
    fn default() -> Self {
        Self::Env {
            prefix: default_env_prefix(),
        }
    }
}

#[cfg(not(feature = "env"))]
impl Default for SecretsConfig {
    fn default() -> Self {
        Self::Memory
    }
}

#[cfg(feature = "env")]
fn default_env_prefix() -> String {
    crate::env::DEFAULT_PREFIX.to_owned()
}

impl SecretsConfig {
    /// Short backend name for logging.
    #[must_use]
    pub const fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            #[cfg(feature = "env")]
            Self::Env { .. } => "env",
            #[cfg(feature = "ssm")]
            Self::Ssm { .. } => "ssm",
        }
    }
}
