//! Application Default Credentials files: service account keys and gcloud
//! user credentials, exchanged for access tokens at the OAuth2 endpoint

use crate::credentials::{non_empty_env, CachedToken, TokenCache, TokenResponse};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use iap_core::{BootstrapError, CoreError, CredentialSource, Credentials, TokenSource};
use rustls::sign::Signer;
use rustls::SignatureScheme;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Path of a credentials file, usually a service account key
pub const APPLICATION_CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
/// Override for the gcloud configuration directory
pub const CLOUDSDK_CONFIG_ENV: &str = "CLOUDSDK_CONFIG";

const WELL_KNOWN_FILE: &str = "application_default_credentials.json";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsFile {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Deserialize)]
struct AuthorizedUser {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    #[serde(default)]
    project_id: Option<String>,
}

#[derive(Serialize)]
struct JwtHeader<'a> {
    alg: &'static str,
    typ: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
}

#[derive(Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// RS256 signer for the PEM private key of a service account
fn signer(private_key: &str) -> iap_core::Result<Box<dyn Signer>> {
    let der = rustls_pemfile::private_key(&mut private_key.as_bytes())
        .map_err(|e| CoreError::Credentials(format!("invalid service account key: {}", e)))?
        .ok_or_else(|| CoreError::Credentials("service account key has no private key".to_string()))?;

    rustls::crypto::ring::sign::any_supported_type(&der)
        .map_err(|e| CoreError::Credentials(format!("unusable service account key: {}", e)))?
        .choose_scheme(&[SignatureScheme::RSA_PKCS1_SHA256])
        .ok_or_else(|| CoreError::Credentials("service account key is not an RSA key".to_string()))
}

/// Signed JWT asserting the service account's identity to `audience`
fn assertion(
    key: &ServiceAccountKey,
    signer: &dyn Signer,
    scope: &str,
    audience: &str,
    now: DateTime<Utc>,
) -> iap_core::Result<String> {
    let header = JwtHeader {
        alg: "RS256",
        typ: "JWT",
        kid: key.private_key_id.as_deref(),
    };
    let claims = JwtClaims {
        iss: &key.client_email,
        scope,
        aud: audience,
        iat: now.timestamp(),
        exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
    };

    let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(&claims)?);
    let signature = signer
        .sign(signing_input.as_bytes())
        .map_err(|e| CoreError::Credentials(format!("cannot sign assertion: {}", e)))?;

    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
}

fn encode_segment<T: Serialize>(value: &T) -> iap_core::Result<String> {
    let json = serde_json::to_vec(value)
        .map_err(|e| CoreError::Credentials(format!("cannot encode assertion: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

enum Grant {
    ServiceAccount {
        key: ServiceAccountKey,
        signer: Box<dyn Signer>,
    },
    RefreshToken(AuthorizedUser),
}

/// Tokens minted at an OAuth2 endpoint from a credentials file
pub struct OAuthTokenSource {
    http: reqwest::Client,
    token_url: String,
    scope: String,
    grant: Grant,
    cache: TokenCache,
}

impl OAuthTokenSource {
    fn form(&self) -> iap_core::Result<Vec<(&'static str, String)>> {
        let form = match &self.grant {
            Grant::ServiceAccount { key, signer } => vec![
                ("grant_type", JWT_BEARER_GRANT.to_string()),
                (
                    "assertion",
                    assertion(key, signer.as_ref(), &self.scope, &self.token_url, Utc::now())?,
                ),
            ],
            Grant::RefreshToken(user) => vec![
                ("grant_type", "refresh_token".to_string()),
                ("client_id", user.client_id.clone()),
                ("client_secret", user.client_secret.clone()),
                ("refresh_token", user.refresh_token.clone()),
            ],
        };
        Ok(form)
    }

    async fn fetch(&self) -> iap_core::Result<CachedToken> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&self.form()?)
            .timeout(TOKEN_TIMEOUT)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| CoreError::Credentials(format!("token exchange failed: {}", e)))?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Credentials(format!("invalid token response: {}", e)))?;
        token.into_cached()
    }
}

#[async_trait::async_trait]
impl TokenSource for OAuthTokenSource {
    async fn access_token(&self) -> iap_core::Result<String> {
        self.cache.get_or_fetch(self.fetch()).await
    }
}

/// Credentials read from a JSON credentials file
#[derive(Clone, Debug)]
pub struct FileCredentialSource {
    path: PathBuf,
    token_url: Option<String>,
    http: reqwest::Client,
}

impl FileCredentialSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            token_url: None,
            http: reqwest::Client::new(),
        }
    }

    /// Token endpoint used instead of the file's `token_uri`
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = Some(token_url.into());
        self
    }

    /// File named by `GOOGLE_APPLICATION_CREDENTIALS`, whether or not it exists
    pub fn from_env() -> Option<Self> {
        non_empty_env(APPLICATION_CREDENTIALS_ENV).map(Self::new)
    }

    /// Credentials written by `gcloud auth application-default login`, if present
    pub fn well_known() -> Option<Self> {
        let home = if cfg!(windows) {
            non_empty_env("APPDATA")
        } else {
            non_empty_env("HOME")
        };
        let path = gcloud_config_dir(non_empty_env(CLOUDSDK_CONFIG_ENV), home)?.join(WELL_KNOWN_FILE);
        path.is_file().then(|| Self::new(path))
    }

    async fn load(&self) -> iap_core::Result<CredentialsFile> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CoreError::Credentials(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            CoreError::Credentials(format!("invalid credentials file {}: {}", self.path.display(), e))
        })
    }
}

#[async_trait::async_trait]
impl CredentialSource for FileCredentialSource {
    async fn find_default(&self, scope: &str) -> Result<Credentials, BootstrapError> {
        let (project_id, file_token_url, grant) = match self.load().await? {
            CredentialsFile::ServiceAccount(key) => {
                let signer = signer(&key.private_key)?;
                (key.project_id.clone(), key.token_uri.clone(), Grant::ServiceAccount { key, signer })
            }
            CredentialsFile::AuthorizedUser(user) => {
                (user.project_id.clone(), None, Grant::RefreshToken(user))
            }
        };

        let token_source = OAuthTokenSource {
            http: self.http.clone(),
            token_url: self
                .token_url
                .clone()
                .or(file_token_url)
                .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
            scope: scope.to_string(),
            grant,
            cache: TokenCache::default(),
        };
        debug!("Exchanging credentials from {} at {}", self.path.display(), token_source.token_url);
        token_source.access_token().await?;

        info!("Using credentials file {} (project: {:?})", self.path.display(), project_id);
        Ok(Credentials::new(project_id, Arc::new(token_source)))
    }
}

/// gcloud configuration directory: `CLOUDSDK_CONFIG`, else under the home directory
fn gcloud_config_dir(cloudsdk_config: Option<String>, home: Option<String>) -> Option<PathBuf> {
    if let Some(dir) = cloudsdk_config {
        return Some(PathBuf::from(dir));
    }
    let home = PathBuf::from(home?);
    if cfg!(windows) {
        Some(home.join("gcloud"))
    } else {
        Some(home.join(".config").join("gcloud"))
    }
}
