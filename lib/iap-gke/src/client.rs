//! GKE (Container API) client for cluster discovery

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use iap_core::{CoreError, TokenSource, TrustInfo};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Base URL of the Container API
pub const CONTAINER_API: &str = "https://container.googleapis.com/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// GkeClient lists the clusters of a project with a bearer token
pub struct GkeClient {
    http: reqwest::Client,
    base_url: String,
    token_source: Arc<dyn TokenSource>,
}

impl GkeClient {
    /// Create a client against the public Container API
    pub fn new(token_source: Arc<dyn TokenSource>) -> Self {
        Self::with_base_url(CONTAINER_API, token_source)
    }

    pub fn with_base_url(base_url: impl Into<String>, token_source: Arc<dyn TokenSource>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token_source,
        }
    }

    /// List clusters in every location of a project
    pub async fn list_clusters(&self, project_id: &str) -> anyhow::Result<Vec<Cluster>> {
        let token = self.token_source.access_token().await?;
        let url = format!("{}/projects/{}/locations/-/clusters", self.base_url, project_id);

        let list: ListClustersResponse = self
            .http
            .get(&url)
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !list.missing_zones.is_empty() {
            warn!(
                "Cluster list for {} is missing zones: {}",
                project_id,
                list.missing_zones.join(", ")
            );
        }

        debug!("Discovered {} clusters in {}", list.clusters.len(), project_id);
        Ok(list.clusters)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListClustersResponse {
    #[serde(default)]
    clusters: Vec<Cluster>,
    #[serde(default)]
    missing_zones: Vec<String>,
}

/// The parts of a GKE cluster resource the proxy needs
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub master_auth: Option<MasterAuth>,
    #[serde(default)]
    pub private_cluster_config: Option<PrivateClusterConfig>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterAuth {
    /// Base64-encoded PEM of the cluster root CA
    #[serde(default)]
    pub cluster_ca_certificate: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateClusterConfig {
    #[serde(default)]
    pub private_endpoint: Option<String>,
    #[serde(default)]
    pub public_endpoint: Option<String>,
}

impl Cluster {
    /// Every address the control plane is reachable at, without duplicates
    pub fn endpoints(&self) -> Vec<&str> {
        let private = self.private_cluster_config.as_ref();
        let candidates = [
            self.endpoint.as_deref(),
            private.and_then(|p| p.private_endpoint.as_deref()),
            private.and_then(|p| p.public_endpoint.as_deref()),
        ];

        let mut endpoints: Vec<&str> = Vec::new();
        for endpoint in candidates.into_iter().flatten() {
            if !endpoint.is_empty() && !endpoints.contains(&endpoint) {
                endpoints.push(endpoint);
            }
        }
        endpoints
    }

    /// Trust bundle built from the cluster CA
    pub fn trust_info(&self) -> iap_core::Result<TrustInfo> {
        let encoded = self
            .master_auth
            .as_ref()
            .and_then(|auth| auth.cluster_ca_certificate.as_deref())
            .filter(|ca| !ca.is_empty())
            .ok_or_else(|| {
                CoreError::InvalidCertificate(format!("cluster {} has no CA certificate", self.name))
            })?;

        let pem = STANDARD.decode(encoded.trim()).map_err(|e| {
            CoreError::InvalidCertificate(format!("cluster {} CA is not base64: {}", self.name, e))
        })?;

        TrustInfo::from_pem(&pem)
    }
}
