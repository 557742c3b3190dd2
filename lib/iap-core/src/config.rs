//! Runtime configuration of the reverse proxy

use crate::{CoreError, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration fixed at startup
#[derive(Clone, Debug, PartialEq)]
pub struct ReverseProxyConfig {
    /// Dump raw requests and responses to the log
    pub debug: bool,
    /// Port the TLS listener binds on all interfaces
    pub port: u16,
    /// Project to discover clusters in; taken from the credentials when unset
    pub project_id: Option<String>,
    /// PEM private key of the listener
    pub key_file: PathBuf,
    /// PEM certificate chain of the listener
    pub certificate_file: PathBuf,
    /// Upper bound on one backend exchange. `None` waits indefinitely.
    pub backend_timeout: Option<Duration>,
    /// Upper bound on a buffered backend body. `None` buffers any size.
    pub max_response_bytes: Option<usize>,
}

impl Default for ReverseProxyConfig {
    fn default() -> Self {
        Self {
            debug: false,
            port: 8443,
            project_id: None,
            key_file: PathBuf::new(),
            certificate_file: PathBuf::new(),
            backend_timeout: None,
            max_response_bytes: None,
        }
    }
}

impl ReverseProxyConfig {
    /// Check the settings required to start
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(CoreError::InvalidConfiguration(
                "port must be non-zero".to_string(),
            ));
        }
        if self.key_file.as_os_str().is_empty() {
            return Err(CoreError::InvalidConfiguration(
                "a key file is required".to_string(),
            ));
        }
        if self.certificate_file.as_os_str().is_empty() {
            return Err(CoreError::InvalidConfiguration(
                "a certificate file is required".to_string(),
            ));
        }
        if self.backend_timeout == Some(Duration::ZERO) {
            return Err(CoreError::InvalidConfiguration(
                "backend timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Address of the TLS listener
    pub fn listen_addr(&self) -> SocketAddr {
        ([0, 0, 0, 0], self.port).into()
    }
}
