//! Ambient credential interfaces and the startup bootstrapper

use crate::{BootstrapError, CoreError, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Scope requested for cluster discovery
pub const CLOUD_PLATFORM_READ_ONLY: &str =
    "https://www.googleapis.com/auth/cloud-platform.read-only";

/// Source of OAuth2 bearer tokens
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Token source that always returns the same token
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait::async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String> {
        if self.token.is_empty() {
            return Err(CoreError::Credentials("static token is empty".to_string()));
        }
        Ok(self.token.clone())
    }
}

/// Credentials resolved from the environment
#[derive(Clone)]
pub struct Credentials {
    /// Project the credentials belong to, if the source knows it
    pub project_id: Option<String>,
    token_source: Arc<dyn TokenSource>,
}

impl Credentials {
    pub fn new(project_id: Option<String>, token_source: Arc<dyn TokenSource>) -> Self {
        Self {
            project_id: project_id.filter(|p| !p.is_empty()),
            token_source,
        }
    }

    pub fn token_source(&self) -> Arc<dyn TokenSource> {
        self.token_source.clone()
    }

    pub async fn access_token(&self) -> Result<String> {
        self.token_source.access_token().await
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

/// Locates ambient credentials for a scope
#[async_trait::async_trait]
pub trait CredentialSource: Send + Sync {
    async fn find_default(&self, scope: &str) -> std::result::Result<Credentials, BootstrapError>;
}

/// Resolves credentials and the operating project once at startup
pub struct CredentialBootstrapper<'a> {
    source: &'a dyn CredentialSource,
    configured_project: Option<String>,
}

impl<'a> CredentialBootstrapper<'a> {
    pub fn new(source: &'a dyn CredentialSource, configured_project: Option<String>) -> Self {
        Self {
            source,
            configured_project: configured_project.filter(|p| !p.is_empty()),
        }
    }

    /// Find credentials for `scope` and settle on a project id.
    ///
    /// An explicitly configured project wins; otherwise the credentials'
    /// project is used.
    pub async fn initialize(
        self,
        scope: &str,
    ) -> std::result::Result<(String, Credentials), BootstrapError> {
        debug!("Looking up default credentials for scope {}", scope);
        let credentials = self.source.find_default(scope).await?;

        let project_id = self
            .configured_project
            .or_else(|| credentials.project_id.clone())
            .ok_or(BootstrapError::MissingProjectId)?;

        info!("Using project {}", project_id);
        Ok((project_id, credentials))
    }
}
