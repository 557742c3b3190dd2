//! In-memory registry of trust bundles keyed by endpoint host

use crate::{ClusterInfoProvider, TrustInfo};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// TrustRegistry maps endpoint hosts to the trust bundle of their backend
pub struct TrustRegistry {
    // Map of host (as it appears in the Host header) to trust bundle
    endpoints: Arc<RwLock<HashMap<String, TrustInfo>>>,
}

impl TrustRegistry {
    pub fn new() -> Self {
        Self {
            endpoints: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register or update the trust bundle for a host
    pub async fn register(&self, host: impl Into<String>, trust: TrustInfo) {
        let host = host.into();
        let mut endpoints = self.endpoints.write().await;
        debug!("Registered endpoint: {} ({} root(s))", host, trust.len());
        endpoints.insert(host, trust);
    }

    /// Replace the whole table in one step
    pub async fn replace_all(&self, entries: HashMap<String, TrustInfo>) {
        let mut endpoints = self.endpoints.write().await;
        debug!(
            "Replacing {} endpoint(s) with {} endpoint(s)",
            endpoints.len(),
            entries.len()
        );
        *endpoints = entries;
    }

    /// Get the trust bundle for a host
    pub async fn get(&self, host: &str) -> Option<TrustInfo> {
        let endpoints = self.endpoints.read().await;
        endpoints.get(host).cloned()
    }
}

impl Default for TrustRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ClusterInfoProvider for TrustRegistry {
    async fn resolve(&self, host: &str) -> Option<TrustInfo> {
        self.get(host).await
    }
}
