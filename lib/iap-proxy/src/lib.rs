//! TLS-terminating reverse proxy that routes by Host header to GKE control planes
//!
//! Each request is forwarded over a TLS client built for that request alone,
//! trusting only the root CAs the provider returns for the request host.

pub mod buffered;
pub mod dump;
pub mod error;
pub mod forwarder;
pub mod handler;
pub mod headers;
pub mod lifecycle;
pub mod server;
pub mod tls;

pub use buffered::BufferedResponse;
pub use dump::DebugLogger;
pub use error::ProxyError;
pub use forwarder::{Forwarder, TlsForwarder};
pub use handler::ProxyHandler;
pub use lifecycle::{run, LifecycleState, Listening, ServerLifecycle};
pub use tls::TlsServerConfig;
