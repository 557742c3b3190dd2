//! Startup sequencing: credentials and trust data before the listener opens

use crate::server;
use crate::{DebugLogger, ProxyHandler, TlsForwarder, TlsServerConfig};
use anyhow::{Context, Result};
use iap_core::{
    BootstrapError, ClusterInfoProvider, CredentialBootstrapper, CredentialSource,
    ProviderFactory, ReverseProxyConfig, CLOUD_PLATFORM_READ_ONLY, DEFAULT_REFRESH_INTERVAL,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    CredentialsBootstrapped,
    Serving,
    Terminated,
}

/// Drives the proxy from configuration to a serving listener.
///
/// Any failure moves the lifecycle to `Terminated`; nothing is retried.
pub struct ServerLifecycle {
    config: ReverseProxyConfig,
    state: LifecycleState,
    project_id: Option<String>,
    provider: Option<Arc<dyn ClusterInfoProvider>>,
}

impl ServerLifecycle {
    pub fn new(config: ReverseProxyConfig) -> Self {
        Self {
            config,
            state: LifecycleState::Uninitialized,
            project_id: None,
            provider: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Project settled on during bootstrap
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// Resolve credentials and build the provider
    pub async fn bootstrap(
        &mut self,
        source: &dyn CredentialSource,
        factory: &dyn ProviderFactory,
    ) -> std::result::Result<(), BootstrapError> {
        if self.state != LifecycleState::Uninitialized {
            return Err(BootstrapError::InvalidState(format!(
                "cannot bootstrap from {:?}",
                self.state
            )));
        }

        match Self::build_provider(&self.config, source, factory).await {
            Ok((project_id, provider)) => {
                self.project_id = Some(project_id);
                self.provider = Some(provider);
                self.state = LifecycleState::CredentialsBootstrapped;
                Ok(())
            }
            Err(e) => {
                self.state = LifecycleState::Terminated;
                Err(e)
            }
        }
    }

    async fn build_provider(
        config: &ReverseProxyConfig,
        source: &dyn CredentialSource,
        factory: &dyn ProviderFactory,
    ) -> std::result::Result<(String, Arc<dyn ClusterInfoProvider>), BootstrapError> {
        let (project_id, credentials) = CredentialBootstrapper::new(source, config.project_id.clone())
            .initialize(CLOUD_PLATFORM_READ_ONLY)
            .await?;

        let provider = factory
            .create(&project_id, credentials, DEFAULT_REFRESH_INTERVAL)
            .await?;
        info!("Cluster information loaded for project {}", project_id);
        Ok((project_id, provider))
    }

    /// Load the TLS identity and bind the listener
    pub async fn bind(&mut self) -> Result<Listening> {
        let result = self.try_bind().await;
        match &result {
            Ok(_) => self.state = LifecycleState::Serving,
            Err(_) => self.state = LifecycleState::Terminated,
        }
        result
    }

    async fn try_bind(&self) -> Result<Listening> {
        let provider = match (&self.state, &self.provider) {
            (LifecycleState::CredentialsBootstrapped, Some(provider)) => provider.clone(),
            (state, _) => {
                return Err(BootstrapError::InvalidState(format!(
                    "cannot serve from {:?}",
                    state
                ))
                .into())
            }
        };

        let tls = TlsServerConfig::from_files(&self.config.certificate_file, &self.config.key_file)
            .map_err(|e| BootstrapError::TlsIdentity(format!("{:#}", e)))?;

        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        let local_addr = listener.local_addr()?;

        let forwarder = TlsForwarder::new()
            .with_timeout(self.config.backend_timeout)
            .with_max_response_bytes(self.config.max_response_bytes);
        let handler = ProxyHandler::new(
            provider,
            Arc::new(forwarder),
            DebugLogger::new(self.config.debug),
        );

        info!("Listening on {}", local_addr);
        Ok(Listening {
            listener,
            acceptor: tls.acceptor(),
            handler: Arc::new(handler),
            local_addr,
        })
    }

    /// Bind and serve until a fatal error
    pub async fn serve(&mut self) -> Result<()> {
        let listening = self.bind().await?;
        let result = listening.run().await;
        self.state = LifecycleState::Terminated;
        result
    }
}

/// A bound listener with its handler, ready to accept connections
pub struct Listening {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    handler: Arc<ProxyHandler>,
    local_addr: SocketAddr,
}

impl Listening {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn run(self) -> Result<()> {
        server::serve(self.listener, self.acceptor, self.handler).await
    }
}

/// Validate, bootstrap, then serve. Returns only on a fatal error.
pub async fn run(
    config: ReverseProxyConfig,
    source: &dyn CredentialSource,
    factory: &dyn ProviderFactory,
) -> Result<()> {
    config.validate().context("invalid configuration")?;

    let mut lifecycle = ServerLifecycle::new(config);
    if let Err(e) = lifecycle.bootstrap(source, factory).await {
        error!("Bootstrap failed: {}", e);
        return Err(e).context("failed to retrieve cluster information");
    }

    lifecycle.serve().await.context("failed to start server")
}

#[cfg(test)]
mod tests {
    use super::*;
    use iap_core::{Credentials, StaticTokenSource, TrustRegistry};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedSource {
        project_id: Option<String>,
    }

    #[async_trait::async_trait]
    impl CredentialSource for FixedSource {
        async fn find_default(&self, _scope: &str) -> std::result::Result<Credentials, BootstrapError> {
            Ok(Credentials::new(
                self.project_id.clone(),
                Arc::new(StaticTokenSource::new("token")),
            ))
        }
    }

    struct FailingSource;

    #[async_trait::async_trait]
    impl CredentialSource for FailingSource {
        async fn find_default(&self, _scope: &str) -> std::result::Result<Credentials, BootstrapError> {
            Err(BootstrapError::Credentials("no ambient credentials".to_string()))
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ProviderFactory for CountingFactory {
        async fn create(
            &self,
            _project_id: &str,
            _credentials: Credentials,
            refresh_interval: Duration,
        ) -> std::result::Result<Arc<dyn ClusterInfoProvider>, BootstrapError> {
            assert_eq!(refresh_interval, DEFAULT_REFRESH_INTERVAL);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(TrustRegistry::new()))
        }
    }

    fn config(port: u16) -> ReverseProxyConfig {
        ReverseProxyConfig {
            port,
            key_file: PathBuf::from("/nonexistent/server.key"),
            certificate_file: PathBuf::from("/nonexistent/server.crt"),
            ..Default::default()
        }
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn test_bootstrap_success() {
        let factory = CountingFactory::default();
        let mut lifecycle = ServerLifecycle::new(config(8443));
        let source = FixedSource {
            project_id: Some("from-credentials".to_string()),
        };

        lifecycle.bootstrap(&source, &factory).await.unwrap();

        assert_eq!(lifecycle.state(), LifecycleState::CredentialsBootstrapped);
        assert_eq!(lifecycle.project_id(), Some("from-credentials"));
        assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_configured_project_wins() {
        let mut cfg = config(8443);
        cfg.project_id = Some("configured".to_string());
        let mut lifecycle = ServerLifecycle::new(cfg);
        let source = FixedSource {
            project_id: Some("from-credentials".to_string()),
        };

        lifecycle
            .bootstrap(&source, &CountingFactory::default())
            .await
            .unwrap();
        assert_eq!(lifecycle.project_id(), Some("configured"));
    }

    #[tokio::test]
    async fn test_missing_project_terminates() {
        let factory = CountingFactory::default();
        let mut lifecycle = ServerLifecycle::new(config(8443));

        let err = lifecycle
            .bootstrap(&FixedSource { project_id: None }, &factory)
            .await
            .unwrap_err();

        assert!(matches!(err, BootstrapError::MissingProjectId));
        assert_eq!(lifecycle.state(), LifecycleState::Terminated);
        assert_eq!(factory.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bootstrap_twice_is_rejected() {
        let factory = CountingFactory::default();
        let source = FixedSource {
            project_id: Some("p".to_string()),
        };
        let mut lifecycle = ServerLifecycle::new(config(8443));
        lifecycle.bootstrap(&source, &factory).await.unwrap();

        let err = lifecycle.bootstrap(&source, &factory).await.unwrap_err();
        assert!(matches!(err, BootstrapError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_failing_source_never_opens_listener() {
        let port = free_port();
        let mut cfg = config(port);
        cfg.project_id = Some("p".to_string());

        let result = run(cfg, &FailingSource, &CountingFactory::default()).await;
        assert!(result.is_err());

        let connect = tokio::net::TcpStream::connect(("127.0.0.1", port)).await;
        assert!(connect.is_err());
    }

    #[tokio::test]
    async fn test_serve_requires_bootstrap() {
        let mut lifecycle = ServerLifecycle::new(config(8443));
        let err = lifecycle.serve().await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<BootstrapError>(),
            Some(BootstrapError::InvalidState(_))
        ));
        assert_eq!(lifecycle.state(), LifecycleState::Terminated);
    }

    #[tokio::test]
    async fn test_unreadable_identity_terminates() {
        let mut lifecycle = ServerLifecycle::new(config(free_port()));
        lifecycle
            .bootstrap(
                &FixedSource {
                    project_id: Some("p".to_string()),
                },
                &CountingFactory::default(),
            )
            .await
            .unwrap();

        let err = lifecycle.serve().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BootstrapError>(),
            Some(BootstrapError::TlsIdentity(_))
        ));
        assert_eq!(lifecycle.state(), LifecycleState::Terminated);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_bootstrap() {
        let factory = CountingFactory::default();
        let source = FixedSource {
            project_id: Some("p".to_string()),
        };
        let result = run(ReverseProxyConfig::default(), &source, &factory).await;

        assert!(result.is_err());
        assert_eq!(factory.calls.load(Ordering::SeqCst), 0);
    }
}
