//! Read-only secret resolution for Harbour releases.
//!
//! The release orchestrator needs a handful of values it must not log or
//! persist, most notably the database connection string handed to the
//! migration task. This crate provides a trait-based abstraction over where
//! those values live. Secrets are protected in memory using the `secrecy` and
//! `zeroize` crates.
//!
//! # Backends
//!
//! - **Memory**: In-memory storage for tests and dry runs
//! - **Env** (`env` feature): Environment variables with a prefix
//! - **Parameter Store** (`ssm` feature): AWS SSM Parameter Store, decrypting
//!   `SecureString` parameters
//!
//! # Scope Resolution
//!
//! Secrets support three-tier scoping with automatic resolution:
//!
//! 1. **Environment**: Most specific, project + environment pair
//! 2. **Project**: Available across all environments
//! 3. **Global**: Available everywhere
//!
//! When retrieving a secret, the backend searches from most specific to
//! least specific, returning the first match.
//!
//! # Example
//!
//! ```rust,ignore
//! use harbour_secrets::{SecretContext, SecretsBackend};
//!
//! let ctx = SecretContext::new()
//!     .with_project("shop")
//!     .with_environment("prod");
//!
//! // Searches /shop/prod/database-url, /shop/database-url, /database-url
//! let url = backend.get("database-url", &ctx).await?;
//! ```

mod config;
mod error;
mod memory;
mod provider;
mod traits;
mod types;

#[cfg(feature = "env")]
mod env;

#[cfg(feature = "ssm")]
mod parameter_store;

pub use config::SecretsConfig;
pub use error::SecretsError;
pub use memory::MemorySecrets;
pub use provider::SecretsProvider;
pub use traits::SecretsBackend;
pub use types::{SecretContext, SecretScope, SecretValue};

#[cfg(feature = "env")]
pub use env::EnvSecrets;

#[cfg(feature = "ssm")]
pub use parameter_store::ParameterStoreSecrets;
