//! Per-request failures and the response each one produces

use crate::BufferedResponse;
use hyper::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Failure while handling one request. Never escapes the request.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("{0} is not a cluster endpoint")]
    UnknownEndpoint(String),

    #[error("failed to parse URL https://{host}, {reason}")]
    InvalidTarget { host: String, reason: String },

    #[error("failed to build TLS client: {0}")]
    TlsClient(String),

    #[error("failed to read request body: {0}")]
    RequestBody(String),

    #[error("error communicating with backend: {0}")]
    Forwarding(String),

    #[error("backend response exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },

    #[error("backend did not respond within {0:?}")]
    Timeout(Duration),
}

impl ProxyError {
    /// Status code returned to the client
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidTarget { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Response relayed to the client in place of a backend response.
    ///
    /// Routing and construction errors explain themselves in the body; backend
    /// failures get an empty body and are only detailed in the log.
    pub fn to_buffered(&self) -> BufferedResponse {
        match self {
            ProxyError::UnknownEndpoint(_) | ProxyError::InvalidTarget { .. } => {
                BufferedResponse::text(self.status(), self.to_string())
            }
            _ => BufferedResponse::empty(self.status()),
        }
    }
}
