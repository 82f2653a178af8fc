//! Secret scopes, values and lookup context.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Where a secret lives.
///
/// A release to `shop`/`prod` looks for `database-url` under the
/// environment first, then the project, then globally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretScope {
    /// Shared by every project.
    Global,
    /// Shared by every environment of one project.
    Project {
        /// Project name.
        project_id: String,
    },
    /// One environment of one project.
    Environment {
        /// Project name.
        project_id: String,
        /// Environment name, e.g. `staging`.
        environment: String,
    },
}

impl SecretScope {
    /// The global scope.
    #[must_use]
    pub const fn global() -> Self {
        Self::Global
    }

    /// A project scope.
    #[must_use]
    pub fn project(project_id: impl Into<String>) -> Self {
        Self::Project {
            project_id: project_id.into(),
        }
    }

    /// An environment scope within a project.
    #[must_use]
    pub fn environment(project_id: impl Into<String>, environment: impl Into<String>) -> Self {
        Self::Environment {
            project_id: project_id.into(),
            environment: environment.into(),
        }
    }

    /// Flat key used by key-value stores.
    #[must_use]
    pub fn to_key(&self) -> String {
        match self.segments().as_slice() {
            [] => "global".to_owned(),
            [project] => format!("project:{project}"),
            segments => format!("env:{}", segments.join(":")),
        }
    }

    /// Path components used by hierarchical stores.
    ///
    /// Parameter Store keeps an environment secret under
    /// `/{project}/{environment}/`.
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        match self {
            Self::Global => Vec::new(),
            Self::Project { project_id } => vec![project_id],
            Self::Environment {
                project_id,
                environment,
            } => vec![project_id, environment],
        }
    }
}

impl fmt::Display for SecretScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}

/// A resolved secret.
///
/// Held as a `SecretString` so it is zeroed on drop; `Debug` never prints it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretValue {
    #[zeroize(skip)]
    inner: SecretString,
}

impl SecretValue {
    /// Wrap a plaintext value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: SecretString::from(value.into()),
        }
    }

    /// Borrow the plaintext, e.g. to place it in a task override.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.inner.expose_secret()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl PartialEq for SecretValue {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (self.expose().as_bytes(), other.expose().as_bytes());
        a.len() == b.len() && bool::from(a.ct_eq(b))
    }
}

impl Eq for SecretValue {}

/// Project and environment a release runs in.
///
/// Determines the scopes searched for a secret.
#[derive(Debug, Clone, Default)]
pub struct SecretContext {
    /// Project, if configured.
    pub project_id: Option<String>,
    /// Environment being released to.
    pub environment: Option<String>,
}

impl SecretContext {
    /// An empty context; only global secrets are visible.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the project.
    #[must_use]
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Set the environment.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Scopes to search, most specific first.
    ///
    /// An environment without a project has nowhere to live, so it only
    /// adds the global scope.
    #[must_use]
    pub fn resolution_order(&self) -> Vec<SecretScope> {
        let mut scopes = Vec::with_capacity(3);
        if let Some(project_id) = &self.project_id {
            if let Some(environment) = &self.environment {
                scopes.push(SecretScope::environment(project_id, environment));
            }
            scopes.push(SecretScope::project(project_id));
        }
        scopes.push(SecretScope::Global);
        scopes
    }
}
