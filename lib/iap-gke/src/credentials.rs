//! Ambient Google Cloud credentials: environment token, credentials file
//! or GCE metadata server

use crate::adc::FileCredentialSource;
use chrono::{DateTime, Utc};
use iap_core::{BootstrapError, CoreError, CredentialSource, Credentials, StaticTokenSource, TokenSource};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Static bearer token, e.g. the output of `gcloud auth print-access-token`
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
/// Environment variables consulted for the default project, in order
pub const PROJECT_ENVS: [&str; 2] = ["GOOGLE_CLOUD_PROJECT", "CLOUDSDK_CORE_PROJECT"];
/// Override for the metadata server host
pub const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";

const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN_SECS: i64 = 60;

pub(crate) fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Credentials taken from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvCredentialSource {
    token: Option<String>,
    project_id: Option<String>,
}

impl EnvCredentialSource {
    pub fn new(token: Option<String>, project_id: Option<String>) -> Self {
        Self { token, project_id }
    }

    pub fn from_env() -> Self {
        Self {
            token: non_empty_env(ACCESS_TOKEN_ENV),
            project_id: PROJECT_ENVS.iter().find_map(|name| non_empty_env(name)),
        }
    }

    /// Whether a token is present
    pub fn is_available(&self) -> bool {
        self.token.is_some()
    }
}

#[async_trait::async_trait]
impl CredentialSource for EnvCredentialSource {
    async fn find_default(&self, _scope: &str) -> Result<Credentials, BootstrapError> {
        let token = self
            .token
            .clone()
            .ok_or_else(|| BootstrapError::Credentials(format!("{} is not set", ACCESS_TOKEN_ENV)))?;

        info!("Using access token from {}", ACCESS_TOKEN_ENV);
        Ok(Credentials::new(
            self.project_id.clone(),
            Arc::new(StaticTokenSource::new(token)),
        ))
    }
}

/// Client for the GCE/GKE metadata server
#[derive(Clone, Debug)]
pub struct MetadataServerSource {
    http: reqwest::Client,
    base_url: String,
}

impl MetadataServerSource {
    /// Metadata server at `GCE_METADATA_HOST`, or the well-known host
    pub fn new() -> Self {
        let host = non_empty_env(METADATA_HOST_ENV).unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());
        Self::with_base_url(format!("http://{}", host))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> reqwest::Result<reqwest::Response> {
        self.http
            .get(format!("{}/computeMetadata/v1/{}", self.base_url, path))
            .query(query)
            .header("Metadata-Flavor", "Google")
            .timeout(METADATA_TIMEOUT)
            .send()
            .await?
            .error_for_status()
    }

    /// Project the instance runs in
    pub async fn project_id(&self) -> Option<String> {
        match self.get("project/project-id", &[]).await {
            Ok(response) => response
                .text()
                .await
                .ok()
                .map(|text| text.trim().to_string())
                .filter(|project| !project.is_empty()),
            Err(e) => {
                debug!("Metadata server has no project id: {}", e);
                None
            }
        }
    }

    /// Token source for the default service account
    pub fn token_source(&self, scope: &str) -> MetadataTokenSource {
        MetadataTokenSource {
            server: self.clone(),
            scope: scope.to_string(),
            cache: TokenCache::default(),
        }
    }
}

impl Default for MetadataServerSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CredentialSource for MetadataServerSource {
    async fn find_default(&self, scope: &str) -> Result<Credentials, BootstrapError> {
        let token_source = self.token_source(scope);
        // Prove the service account can mint tokens before anything depends on it
        token_source
            .access_token()
            .await
            .map_err(|e| BootstrapError::Credentials(e.to_string()))?;

        let project_id = self.project_id().await;
        info!("Using metadata server credentials (project: {:?})", project_id);
        Ok(Credentials::new(project_id, Arc::new(token_source)))
    }
}

/// OAuth2 token endpoint reply
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    token_type: String,
}

impl TokenResponse {
    pub(crate) fn into_cached(self) -> iap_core::Result<CachedToken> {
        if !self.token_type.is_empty() && !self.token_type.eq_ignore_ascii_case("bearer") {
            return Err(CoreError::Credentials(format!(
                "unsupported token type {}",
                self.token_type
            )));
        }

        debug!("Fetched token valid for {}s", self.expires_in);
        Ok(CachedToken {
            value: self.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(self.expires_in.clamp(0, 86_400)),
        })
    }
}

pub(crate) struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

/// Last token minted, reused until near expiry
#[derive(Default)]
pub(crate) struct TokenCache {
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    /// The cached token, or the result of `fetch` when it is stale
    pub(crate) async fn get_or_fetch<F>(&self, fetch: F) -> iap_core::Result<String>
    where
        F: Future<Output = iap_core::Result<CachedToken>>,
    {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.value.clone());
            }
        }

        let token = fetch.await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }
}

/// Service-account tokens from the metadata server, cached until near expiry
pub struct MetadataTokenSource {
    server: MetadataServerSource,
    scope: String,
    cache: TokenCache,
}

impl MetadataTokenSource {
    async fn fetch(&self) -> iap_core::Result<CachedToken> {
        let response = self
            .server
            .get(
                "instance/service-accounts/default/token",
                &[("scopes", self.scope.as_str())],
            )
            .await
            .map_err(|e| CoreError::Credentials(format!("metadata token request failed: {}", e)))?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Credentials(format!("invalid metadata token response: {}", e)))?;
        token.into_cached()
    }
}

#[async_trait::async_trait]
impl TokenSource for MetadataTokenSource {
    async fn access_token(&self) -> iap_core::Result<String> {
        self.cache.get_or_fetch(self.fetch()).await
    }
}

/// Application Default Credentials lookup.
///
/// In order: an access token in the environment, the key file named by
/// `GOOGLE_APPLICATION_CREDENTIALS`, the gcloud user credentials file,
/// then the metadata server. A file that is present but unusable is an
/// error; the chain does not fall through it.
pub struct AmbientCredentialSource {
    env: EnvCredentialSource,
    file: Option<FileCredentialSource>,
    metadata: MetadataServerSource,
}

impl AmbientCredentialSource {
    pub fn new() -> Self {
        Self {
            env: EnvCredentialSource::from_env(),
            file: FileCredentialSource::from_env().or_else(FileCredentialSource::well_known),
            metadata: MetadataServerSource::new(),
        }
    }

    pub fn with_sources(
        env: EnvCredentialSource,
        file: Option<FileCredentialSource>,
        metadata: MetadataServerSource,
    ) -> Self {
        Self { env, file, metadata }
    }
}

impl Default for AmbientCredentialSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CredentialSource for AmbientCredentialSource {
    async fn find_default(&self, scope: &str) -> Result<Credentials, BootstrapError> {
        if self.env.is_available() {
            return self.env.find_default(scope).await;
        }
        match &self.file {
            Some(file) => file.find_default(scope).await,
            None => self.metadata.find_default(scope).await,
        }
    }
}
