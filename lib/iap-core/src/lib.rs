//! Core types for the GKE IAP reverse proxy
//!
//! This library provides:
//! - Proxy configuration
//! - Trust bundles and the provider interface used to resolve them by host
//! - Credential interfaces and the startup credential bootstrapper
//! - An in-memory trust registry

pub mod config;
pub mod credentials;
pub mod error;
pub mod provider;
pub mod registry;
pub mod trust;

pub use config::ReverseProxyConfig;
pub use credentials::{
    CredentialBootstrapper, CredentialSource, Credentials, StaticTokenSource, TokenSource,
    CLOUD_PLATFORM_READ_ONLY,
};
pub use error::{BootstrapError, CoreError, Result};
pub use provider::{ClusterInfoProvider, ProviderFactory, DEFAULT_REFRESH_INTERVAL};
pub use registry::TrustRegistry;
pub use trust::{load_certificates, TrustInfo};
