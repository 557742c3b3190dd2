//! Google Cloud integration: ambient credentials and GKE cluster discovery
pub mod adc;
pub mod cache;
pub mod client;
pub mod credentials;

pub use adc::FileCredentialSource;
pub use cache::{ClusterInfoCache, GkeProviderFactory};
pub use client::{Cluster, GkeClient};
pub use credentials::{AmbientCredentialSource, EnvCredentialSource, MetadataServerSource};
