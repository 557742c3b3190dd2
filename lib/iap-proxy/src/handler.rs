//! Per-request pipeline: resolve trust, rewrite, forward, buffer, relay

use crate::dump::DebugLogger;
use crate::headers::{append_forwarded_for, promote_real_authorization, strip_hop_by_hop};
use crate::{BufferedResponse, Forwarder, ProxyError};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::HOST;
use hyper::{Request, Response, Uri, Version};
use iap_core::ClusterInfoProvider;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// Handler shared by every connection of the server
pub struct ProxyHandler {
    provider: Arc<dyn ClusterInfoProvider>,
    forwarder: Arc<dyn Forwarder>,
    debug: DebugLogger,
}

impl ProxyHandler {
    pub fn new(
        provider: Arc<dyn ClusterInfoProvider>,
        forwarder: Arc<dyn Forwarder>,
        debug: DebugLogger,
    ) -> Self {
        Self {
            provider,
            forwarder,
            debug,
        }
    }

    /// Handle one inbound request. Every failure becomes a response.
    pub async fn handle<B>(&self, request: Request<B>, peer: Option<SocketAddr>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        let host = request_host(&request);
        let span = info_span!(
            "request",
            id = %Uuid::new_v4(),
            host = %host,
            method = %request.method(),
        );

        self.process(host, request, peer)
            .instrument(span)
            .await
            .into_response()
    }

    async fn process<B>(&self, host: String, request: Request<B>, peer: Option<SocketAddr>) -> BufferedResponse
    where
        B: Body,
        B::Error: Display,
    {
        let Some(trust) = self.provider.resolve(&host).await else {
            debug!("No trust bundle for {}", host);
            return ProxyError::UnknownEndpoint(host).to_buffered();
        };

        let target = match backend_target(&host, request.uri()) {
            Ok(target) => target,
            Err(e) => {
                warn!("{}", e);
                return e.to_buffered();
            }
        };

        let mut outbound = match rewrite_request(request, target).await {
            Ok(outbound) => outbound,
            Err(e) => {
                warn!("{}", e);
                return e.to_buffered();
            }
        };

        // Dumped as the client sent it, after the Authorization rewrite
        self.debug.dump_request(&outbound);
        apply_hop_rules(&mut outbound, peer);

        let response = match self.forwarder.forward(outbound, &trust).await {
            Ok(response) => response,
            Err(e) => {
                warn!("proxy error: {}", e);
                e.to_buffered()
            }
        };

        self.debug.dump_response(&response);
        debug!(status = %response.status, bytes = response.body.len(), "Relaying response");
        response
    }
}

/// Host the client addressed: the Host header, else the URI authority
pub fn request_host<B>(request: &Request<B>) -> String {
    request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

/// `https://<host>` followed by the request's path and query
pub fn backend_target(host: &str, uri: &Uri) -> Result<Uri, ProxyError> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    Uri::builder()
        .scheme("https")
        .authority(host)
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::InvalidTarget {
            host: host.to_string(),
            reason: e.to_string(),
        })
}

/// Buffer the inbound body, promote `X-Real-Authorization` and retarget
async fn rewrite_request<B>(request: Request<B>, target: Uri) -> Result<Request<Bytes>, ProxyError>
where
    B: Body,
    B::Error: Display,
{
    let (mut parts, body) = request.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| ProxyError::RequestBody(e.to_string()))?
        .to_bytes();

    if promote_real_authorization(&mut parts.headers) {
        debug!("Promoted X-Real-Authorization to Authorization");
    }
    parts.uri = target;
    Ok(Request::from_parts(parts, body))
}

/// Headers and version of the hop to the backend
fn apply_hop_rules(request: &mut Request<Bytes>, peer: Option<SocketAddr>) {
    strip_hop_by_hop(request.headers_mut());
    if let Some(peer) = peer {
        append_forwarded_for(request.headers_mut(), peer.ip());
    }
    *request.version_mut() = Version::HTTP_11;
}
