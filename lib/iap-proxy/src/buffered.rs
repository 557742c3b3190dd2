//! Backend response held in memory until it is relayed

use crate::ProxyError;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{HeaderMap, Response, StatusCode};

/// Status, headers and complete body of a backend response.
///
/// Header order and repeated values are kept exactly as received.
#[derive(Clone, Debug)]
pub struct BufferedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BufferedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Response with a status and nothing else
    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, HeaderMap::new(), Bytes::new())
    }

    /// Plain-text response
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self::new(status, headers, Bytes::from(body.into()))
    }

    /// Read a response to the end.
    ///
    /// With `limit` set, a body larger than `limit` bytes is discarded and
    /// reported as [`ProxyError::ResponseTooLarge`].
    pub async fn from_response<B>(response: Response<B>, limit: Option<usize>) -> Result<Self, ProxyError>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = response.into_parts();
        let collected = Limited::new(body, limit.unwrap_or(usize::MAX))
            .collect()
            .await
            .map_err(|e| match (e.downcast_ref::<LengthLimitError>(), limit) {
                (Some(_), Some(limit)) => ProxyError::ResponseTooLarge { limit },
                _ => ProxyError::Forwarding(format!("failed to read response body: {}", e)),
            })?;

        Ok(Self::new(parts.status, parts.headers, collected.to_bytes()))
    }

    /// Turn the buffered value into the response written to the client
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
