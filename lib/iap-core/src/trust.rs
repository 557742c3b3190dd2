//! Trust bundles: the root certificate authorities accepted for one backend

use crate::{CoreError, Result};
use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;
use rustls_pemfile::certs;
use std::fmt;
use std::io::BufReader;
use std::sync::Arc;
use tracing::debug;

/// Set of root CAs valid for authenticating exactly one backend.
///
/// Cloning is cheap: clones share the same underlying root store, so a
/// provider can hand out read-only handles to concurrent requests.
#[derive(Clone)]
pub struct TrustInfo {
    roots: Arc<RootCertStore>,
}

impl TrustInfo {
    /// Wrap an already populated root store
    pub fn new(roots: RootCertStore) -> Self {
        Self {
            roots: Arc::new(roots),
        }
    }

    /// Build a trust bundle from DER certificates
    pub fn from_certificates(certificates: Vec<CertificateDer<'static>>) -> Result<Self> {
        if certificates.is_empty() {
            return Err(CoreError::InvalidCertificate(
                "trust bundle contains no certificates".to_string(),
            ));
        }

        let mut roots = RootCertStore::empty();
        for cert in certificates {
            roots
                .add(cert)
                .map_err(|e| CoreError::InvalidCertificate(e.to_string()))?;
        }

        debug!("Built trust bundle with {} root(s)", roots.len());
        Ok(Self::new(roots))
    }

    /// Build a trust bundle from PEM-encoded certificates
    pub fn from_pem(pem_data: &[u8]) -> Result<Self> {
        Self::from_certificates(load_certificates(pem_data)?)
    }

    /// The root store to hand to a TLS client configuration
    pub fn root_store(&self) -> Arc<RootCertStore> {
        self.roots.clone()
    }

    /// Number of trusted roots
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Whether two handles refer to the same bundle
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.roots, &b.roots)
    }
}

impl fmt::Debug for TrustInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustInfo")
            .field("roots", &self.roots.len())
            .finish()
    }
}

/// Load certificates from PEM-encoded data
pub fn load_certificates(pem_data: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(pem_data);
    certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| CoreError::InvalidCertificate(format!("Failed to parse certificates: {}", e)))
}
