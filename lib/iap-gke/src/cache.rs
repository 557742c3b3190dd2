//! Periodically refreshed map of GKE control-plane endpoints to their CA

use crate::client::GkeClient;
use iap_core::{
    BootstrapError, ClusterInfoProvider, Credentials, ProviderFactory, TrustInfo, TrustRegistry,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// ClusterInfoCache resolves a control-plane endpoint to its cluster CA.
///
/// The first load happens in the constructor; later refreshes run on a
/// background task that lives as long as the cache.
pub struct ClusterInfoCache {
    registry: Arc<TrustRegistry>,
    refresher: JoinHandle<()>,
}

impl ClusterInfoCache {
    /// Load the clusters of `project_id` and keep them fresh
    pub async fn new(
        project_id: &str,
        credentials: Credentials,
        refresh_interval: Duration,
    ) -> Result<Self, BootstrapError> {
        let client = GkeClient::new(credentials.token_source());
        Self::with_client(client, project_id, refresh_interval).await
    }

    pub async fn with_client(
        client: GkeClient,
        project_id: &str,
        refresh_interval: Duration,
    ) -> Result<Self, BootstrapError> {
        let registry = Arc::new(TrustRegistry::new());

        let count = refresh(&client, project_id, &registry)
            .await
            .map_err(|e| BootstrapError::ClusterInfo(format!("{:#}", e)))?;
        info!(
            "Loaded {} cluster endpoint(s) for project {}, refreshing every {:?}",
            count, project_id, refresh_interval
        );

        let refresher = tokio::spawn(refresh_loop(
            client,
            project_id.to_string(),
            registry.clone(),
            refresh_interval,
        ));

        Ok(Self {
            registry,
            refresher,
        })
    }
}

impl Drop for ClusterInfoCache {
    fn drop(&mut self) {
        self.refresher.abort();
    }
}

#[async_trait::async_trait]
impl ClusterInfoProvider for ClusterInfoCache {
    async fn resolve(&self, host: &str) -> Option<TrustInfo> {
        self.registry.resolve(host).await
    }
}

async fn refresh(
    client: &GkeClient,
    project_id: &str,
    registry: &TrustRegistry,
) -> anyhow::Result<usize> {
    let clusters = client.list_clusters(project_id).await?;

    let mut entries = HashMap::new();
    for cluster in &clusters {
        match cluster.trust_info() {
            Ok(trust) => {
                for endpoint in cluster.endpoints() {
                    debug!("Endpoint {} belongs to cluster {}/{}", endpoint, cluster.location, cluster.name);
                    entries.insert(endpoint.to_string(), trust.clone());
                }
            }
            Err(e) => {
                warn!("Skipping cluster {}/{}: {}", cluster.location, cluster.name, e);
            }
        }
    }

    let count = entries.len();
    registry.replace_all(entries).await;
    Ok(count)
}

async fn refresh_loop(
    client: GkeClient,
    project_id: String,
    registry: Arc<TrustRegistry>,
    refresh_interval: Duration,
) {
    let mut ticker = tokio::time::interval(refresh_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the constructor already loaded
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match refresh(&client, &project_id, &registry).await {
            Ok(count) => debug!("Refreshed {} cluster endpoint(s)", count),
            Err(e) => error!("Failed to refresh cluster information, keeping previous: {:#}", e),
        }
    }
}

/// Creates a [`ClusterInfoCache`] for the bootstrapped project
pub struct GkeProviderFactory;

#[async_trait::async_trait]
impl ProviderFactory for GkeProviderFactory {
    async fn create(
        &self,
        project_id: &str,
        credentials: Credentials,
        refresh_interval: Duration,
    ) -> Result<Arc<dyn ClusterInfoProvider>, BootstrapError> {
        let cache = ClusterInfoCache::new(project_id, credentials, refresh_interval).await?;
        Ok(Arc::new(cache))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use iap_core::StaticTokenSource;
    use mockito::Server;
    use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};

    const CLUSTERS_PATH: &str = "/projects/p/locations/-/clusters";

    fn encoded_ca() -> String {
        let key = KeyPair::generate().expect("key");
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("params");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        STANDARD.encode(params.self_signed(&key).expect("ca").pem())
    }

    fn client(url: String) -> GkeClient {
        GkeClient::with_base_url(url, Arc::new(StaticTokenSource::new("t")))
    }

    #[tokio::test]
    async fn test_initial_load_indexes_all_endpoints() {
        let mut server = Server::new_async().await;
        let body = serde_json::json!({
            "clusters": [
                {
                    "name": "private",
                    "location": "europe-west4",
                    "endpoint": "34.1.2.3",
                    "masterAuth": { "clusterCaCertificate": encoded_ca() },
                    "privateClusterConfig": {
                        "privateEndpoint": "10.0.0.2",
                        "publicEndpoint": "34.1.2.3"
                    }
                },
                {
                    "name": "public",
                    "location": "us-central1",
                    "endpoint": "35.4.5.6",
                    "masterAuth": { "clusterCaCertificate": encoded_ca() }
                },
                {
                    "name": "provisioning",
                    "location": "us-central1",
                    "endpoint": "35.7.8.9"
                }
            ]
        });
        server
            .mock("GET", CLUSTERS_PATH)
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let cache = ClusterInfoCache::with_client(client(server.url()), "p", Duration::from_secs(300))
            .await
            .expect("cache");

        let private = cache.resolve("34.1.2.3").await.expect("public endpoint");
        let internal = cache.resolve("10.0.0.2").await.expect("private endpoint");
        assert!(TrustInfo::ptr_eq(&private, &internal));

        let public = cache.resolve("35.4.5.6").await.expect("second cluster");
        assert!(!TrustInfo::ptr_eq(&private, &public));

        assert!(cache.resolve("35.7.8.9").await.is_none());
    }

    #[tokio::test]
    async fn test_initial_load_failure_is_bootstrap_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", CLUSTERS_PATH)
            .with_status(500)
            .create_async()
            .await;

        let result = ClusterInfoCache::with_client(client(server.url()), "p", Duration::from_secs(300)).await;
        assert!(matches!(result, Err(BootstrapError::ClusterInfo(_))));
    }

    #[tokio::test]
    async fn test_refresh_replaces_table() {
        let mut server = Server::new_async().await;
        let first = serde_json::json!({
            "clusters": [{ "name": "a", "endpoint": "1.1.1.1",
                           "masterAuth": { "clusterCaCertificate": encoded_ca() } }]
        });
        let second = serde_json::json!({
            "clusters": [{ "name": "b", "endpoint": "2.2.2.2",
                           "masterAuth": { "clusterCaCertificate": encoded_ca() } }]
        });
        let initial = server
            .mock("GET", CLUSTERS_PATH)
            .with_status(200)
            .with_body(first.to_string())
            .create_async()
            .await;

        let cache = ClusterInfoCache::with_client(client(server.url()), "p", Duration::from_millis(50))
            .await
            .expect("cache");
        assert!(cache.resolve("1.1.1.1").await.is_some());
        initial.remove_async().await;

        server
            .mock("GET", CLUSTERS_PATH)
            .with_status(200)
            .with_body(second.to_string())
            .create_async()
            .await;

        let mut refreshed = false;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            if cache.resolve("2.2.2.2").await.is_some() {
                refreshed = true;
                break;
            }
        }
        assert!(refreshed, "background refresh should pick up the new cluster");
        assert!(cache.resolve("1.1.1.1").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_table() {
        let mut server = Server::new_async().await;
        let body = serde_json::json!({
            "clusters": [{ "name": "a", "endpoint": "1.1.1.1",
                           "masterAuth": { "clusterCaCertificate": encoded_ca() } }]
        });
        let initial = server
            .mock("GET", CLUSTERS_PATH)
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let cache = ClusterInfoCache::with_client(client(server.url()), "p", Duration::from_millis(20))
            .await
            .expect("cache");
        initial.remove_async().await;

        let failing = server
            .mock("GET", CLUSTERS_PATH)
            .with_status(503)
            .expect_at_least(1)
            .create_async()
            .await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        failing.assert_async().await;
        assert!(cache.resolve("1.1.1.1").await.is_some());
    }
}
