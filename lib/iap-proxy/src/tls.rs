//! TLS configuration of the client-facing listener

use anyhow::{anyhow, Context, Result};
use rustls::pki_types::PrivateKeyDer;
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

/// The only protocol offered in ALPN; HTTP/2 is never negotiated
pub const ALPN_HTTP11: &[u8] = b"http/1.1";

/// TLS configuration for HTTPS listener
#[derive(Clone)]
pub struct TlsServerConfig {
    /// Rustls server configuration
    pub config: Arc<ServerConfig>,
}

impl TlsServerConfig {
    /// Create a TLS configuration from PEM-encoded certificate chain and private key
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        debug!("Creating TLS configuration from PEM data");

        let mut cert_reader = BufReader::new(cert_pem);
        let cert_chain = certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow!("Failed to parse certificates: {}", e))?;

        if cert_chain.is_empty() {
            return Err(anyhow!("No certificates found in PEM data"));
        }
        debug!("Loaded {} certificate(s)", cert_chain.len());

        let mut key_reader = BufReader::new(key_pem);
        let key: PrivateKeyDer<'static> = private_key(&mut key_reader)
            .map_err(|e| anyhow!("Failed to parse private key: {}", e))?
            .ok_or_else(|| anyhow!("No private key found in PEM data"))?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| anyhow!("Failed to select TLS versions: {}", e))?
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)
            .map_err(|e| anyhow!("Failed to create TLS config: {}", e))?;
        config.alpn_protocols = vec![ALPN_HTTP11.to_vec()];

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Load certificate chain and key from PEM files
    pub fn from_files(certificate_file: &Path, key_file: &Path) -> Result<Self> {
        let cert = std::fs::read(certificate_file)
            .with_context(|| format!("failed to read certificate {}", certificate_file.display()))?;
        let key = std::fs::read(key_file)
            .with_context(|| format!("failed to read key {}", key_file.display()))?;

        let config = Self::from_pem(&cert, &key)?;
        info!(
            "TLS configuration loaded from {} and {}",
            certificate_file.display(),
            key_file.display()
        );
        Ok(config)
    }

    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair};

    fn identity() -> (String, String) {
        let key = KeyPair::generate().expect("key");
        let cert = CertificateParams::new(vec!["localhost".to_string()])
            .expect("params")
            .self_signed(&key)
            .expect("cert");
        (cert.pem(), key.serialize_pem())
    }

    #[test]
    fn test_from_pem_offers_only_http11() {
        let (cert, key) = identity();
        let tls = TlsServerConfig::from_pem(cert.as_bytes(), key.as_bytes()).expect("tls");
        assert_eq!(tls.config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_from_pem_without_certificate() {
        let (_, key) = identity();
        assert!(TlsServerConfig::from_pem(b"", key.as_bytes()).is_err());
    }

    #[test]
    fn test_from_pem_without_key() {
        let (cert, _) = identity();
        assert!(TlsServerConfig::from_pem(cert.as_bytes(), b"").is_err());
    }

    #[test]
    fn test_from_pem_mismatched_key() {
        let (cert, _) = identity();
        let (_, other_key) = identity();
        assert!(TlsServerConfig::from_pem(cert.as_bytes(), other_key.as_bytes()).is_err());
    }

    #[test]
    fn test_from_files_missing_file() {
        let result = TlsServerConfig::from_files(
            Path::new("/nonexistent/server.crt"),
            Path::new("/nonexistent/server.key"),
        );
        let message = format!("{:#}", result.err().expect("missing files"));
        assert!(message.contains("/nonexistent/server.crt"));
    }
}
