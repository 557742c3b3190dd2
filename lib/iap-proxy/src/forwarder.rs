//! HTTPS request forwarding with a per-request trust scope

use crate::headers::strip_hop_by_hop;
use crate::{BufferedResponse, ProxyError};
use bytes::Bytes;
use http_body_util::Full;
use hyper::Request;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use iap_core::TrustInfo;
use rustls::ClientConfig;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type BackendClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Sends one request to its backend and buffers the complete response.
///
/// `request` already carries the absolute `https://` target URI. `trust` is
/// the only set of roots the backend certificate may chain to.
#[async_trait::async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(
        &self,
        request: Request<Bytes>,
        trust: &TrustInfo,
    ) -> Result<BufferedResponse, ProxyError>;
}

/// Forwarder that builds a fresh TLS client for every request.
///
/// Nothing is pooled or shared between requests, so a trust bundle can never
/// leak into another backend's connection.
#[derive(Clone, Debug, Default)]
pub struct TlsForwarder {
    timeout: Option<Duration>,
    max_response_bytes: Option<usize>,
}

impl TlsForwarder {
    /// Forwarder without timeout or response size limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound connect, send and buffering of one exchange
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bound the size of a buffered backend body
    pub fn with_max_response_bytes(mut self, max_response_bytes: Option<usize>) -> Self {
        self.max_response_bytes = max_response_bytes;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn max_response_bytes(&self) -> Option<usize> {
        self.max_response_bytes
    }

    /// TLS client configuration trusting exactly the given roots
    pub fn client_config(trust: &TrustInfo) -> Result<ClientConfig, ProxyError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ProxyError::TlsClient(e.to_string()))?
            .with_root_certificates(trust.root_store())
            .with_no_client_auth();
        Ok(config)
    }

    fn client(trust: &TrustInfo) -> Result<BackendClient, ProxyError> {
        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(Self::client_config(trust)?)
            .https_only()
            .enable_http1()
            .build();

        Ok(Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(connector))
    }

    async fn exchange(
        &self,
        client: BackendClient,
        request: Request<Full<Bytes>>,
    ) -> Result<BufferedResponse, ProxyError> {
        let response = client
            .request(request)
            .await
            .map_err(|e| ProxyError::Forwarding(error_chain(&e)))?;

        debug!("Backend responded with status: {}", response.status());

        let mut buffered = BufferedResponse::from_response(response, self.max_response_bytes).await?;
        strip_hop_by_hop(&mut buffered.headers);

        debug!("Response body size: {} bytes", buffered.body.len());
        Ok(buffered)
    }
}

#[async_trait::async_trait]
impl Forwarder for TlsForwarder {
    async fn forward(
        &self,
        request: Request<Bytes>,
        trust: &TrustInfo,
    ) -> Result<BufferedResponse, ProxyError> {
        debug!("Forwarding request to: {} ({} trusted root(s))", request.uri(), trust.len());

        let client = Self::client(trust)?;
        let (parts, body) = request.into_parts();
        let exchange = self.exchange(client, Request::from_parts(parts, Full::new(body)));

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| ProxyError::Timeout(limit))?,
            None => exchange.await,
        }
    }
}

/// Error message followed by each of its sources
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
