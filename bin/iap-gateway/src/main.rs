use anyhow::Result;
use clap::Parser;
use iap_core::ReverseProxyConfig;
use iap_gke::{AmbientCredentialSource, GkeProviderFactory};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// TLS-terminating reverse proxy in front of GKE control planes
#[derive(Parser, Debug)]
#[command(name = "iap-gateway", version)]
struct Args {
    /// Log every request and response in full
    #[arg(long)]
    debug: bool,

    /// Port to listen on
    #[arg(long, default_value_t = 8443)]
    port: u16,

    /// Google Cloud project to discover clusters in
    #[arg(long)]
    project: Option<String>,

    /// PEM private key of the listener
    #[arg(long)]
    key_file: PathBuf,

    /// PEM certificate chain of the listener
    #[arg(long)]
    certificate_file: PathBuf,

    /// Give up on a backend after this many seconds
    #[arg(long)]
    backend_timeout_secs: Option<u64>,

    /// Fail responses whose body exceeds this many bytes
    #[arg(long)]
    max_response_bytes: Option<usize>,
}

impl From<Args> for ReverseProxyConfig {
    fn from(args: Args) -> Self {
        Self {
            debug: args.debug,
            port: args.port,
            project_id: args.project,
            key_file: args.key_file,
            certificate_file: args.certificate_file,
            backend_timeout: args.backend_timeout_secs.map(Duration::from_secs),
            max_response_bytes: args.max_response_bytes,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run(Args::parse()).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = ReverseProxyConfig::from(args);
    info!("Starting iap-gateway on port {}", config.port);

    iap_proxy::run(config, &AmbientCredentialSource::new(), &GkeProviderFactory).await
}
