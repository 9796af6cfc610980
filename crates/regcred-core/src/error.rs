//! Core error types for regcred
//!
//! Every layer of the credential pipeline translates platform and library
//! errors into [`CredentialError`] at its boundary, so callers only ever
//! match on this taxonomy. An absent credential is not an error: stores
//! return `Ok(None)` for it.

use std::path::PathBuf;
use thiserror::Error;

/// Credential subsystem error taxonomy
#[derive(Debug, Error)]
pub enum CredentialError {
    /// I/O failure or a credential helper / socket that could not be reached
    #[error("credential storage unavailable: {0}")]
    StorageUnavailable(String),

    /// IO errors with the file they happened on
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file or helper output could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// The tenant, registry or helper rejected the credentials
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The access token is past its expiry
    #[error("access token expired for {server}")]
    TokenExpired { server: String },

    /// Refresh grant was rejected or could not be sent
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The caller cancelled the operation
    #[error("{0} canceled")]
    Cancelled(String),

    /// A per-request deadline was exceeded
    #[error("timeout: {0}")]
    Timeout(String),

    /// DNS, TCP or TLS failure while talking to a remote endpoint
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration validation failed
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// The credential helper executable is not installed
    #[error("credential helper {name} not found in PATH")]
    HelperNotFound { name: String },
}

impl CredentialError {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        CredentialError::StorageUnavailable(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        CredentialError::Decode(msg.into())
    }

    /// Create an invalid parameter error
    pub fn invalid(msg: impl Into<String>) -> Self {
        CredentialError::InvalidParam(msg.into())
    }

    /// Wrap an IO error with the path it concerns
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CredentialError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error means the operation was cancelled by the caller
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CredentialError::Cancelled(_))
    }

    /// Whether the error is a credential rejection
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, CredentialError::Unauthorized(_))
    }

    /// Process exit code a CLI command should use for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CredentialError::InvalidParam(_)
            | CredentialError::Unauthorized(_)
            | CredentialError::Decode(_) => EXIT_VALIDATION,
            CredentialError::Io { source, .. }
                if source.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                EXIT_PERMISSION_DENIED
            }
            CredentialError::HelperNotFound { .. } => EXIT_HELPER_NOT_FOUND,
            _ => EXIT_FAILURE,
        }
    }

    /// One-line suggestion printed next to the error by interactive commands
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            CredentialError::Unauthorized(_)
            | CredentialError::TokenExpired { .. }
            | CredentialError::RefreshFailed(_) => Some("run `regcred login` to authenticate again"),
            CredentialError::Decode(_) => {
                Some("check the config file and DOCKER_AUTH_CONFIG for malformed JSON")
            }
            CredentialError::HelperNotFound { .. } => {
                Some("install the credential helper or remove `credsStore` from the config file")
            }
            CredentialError::InvalidParam(_) => Some("fix the registry configuration and retry"),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CredentialError {
    fn from(err: serde_json::Error) -> Self {
        CredentialError::Decode(err.to_string())
    }
}

/// Generic failure
pub const EXIT_FAILURE: i32 = 1;

/// Credential or argument validation failure
pub const EXIT_VALIDATION: i32 = 125;

/// Permission denied at start
pub const EXIT_PERMISSION_DENIED: i32 = 126;

/// Credential helper not found
pub const EXIT_HELPER_NOT_FOUND: i32 = 127;

/// Result type alias for credential operations
pub type Result<T, E = CredentialError> = std::result::Result<T, E>;
