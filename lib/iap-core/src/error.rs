use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Credential error: {0}")]
    Credentials(String),
}

/// Fatal errors raised before the proxy starts serving.
///
/// Any of these terminates the process; there is no partial-service mode.
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("failed to find default credentials: {0}")]
    Credentials(String),

    #[error("specify a --project as there is no default one")]
    MissingProjectId,

    #[error("failed to retrieve cluster information: {0}")]
    ClusterInfo(String),

    #[error("failed to load TLS identity: {0}")]
    TlsIdentity(String),

    #[error("invalid lifecycle transition: {0}")]
    InvalidState(String),
}

impl From<CoreError> for BootstrapError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Credentials(msg) => BootstrapError::Credentials(msg),
            other => BootstrapError::ClusterInfo(other.to_string()),
        }
    }
}
