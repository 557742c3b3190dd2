//! Interfaces for resolving a request host to its trust bundle

use crate::{BootstrapError, Credentials, TrustInfo};
use std::sync::Arc;
use std::time::Duration;

/// Period at which providers refresh their trust data
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Read-only mapping from hostname to trust bundle.
///
/// Implementations must tolerate unbounded concurrent calls. `None` means the
/// host is not a known endpoint, which is a normal routing outcome.
#[async_trait::async_trait]
pub trait ClusterInfoProvider: Send + Sync {
    async fn resolve(&self, host: &str) -> Option<TrustInfo>;
}

/// Builds the provider once credentials and project are known
#[async_trait::async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn create(
        &self,
        project_id: &str,
        credentials: Credentials,
        refresh_interval: Duration,
    ) -> Result<Arc<dyn ClusterInfoProvider>, BootstrapError>;
}
