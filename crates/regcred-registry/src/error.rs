//! Registry error types

use std::path::PathBuf;
use thiserror::Error;

use regcred_core::CredentialError;

/// Registry-specific errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Service config rejected at parse time
    #[error("invalid registry config: {0}")]
    InvalidConfig(String),

    /// Certificate directory could not be read or holds an unusable pair
    #[error("TLS config error at {path}: {reason}")]
    Tls { path: PathBuf, reason: String },

    /// DNS, TLS or connection failure
    #[error("transport error for {registry}: {reason}")]
    Transport { registry: String, reason: String },

    /// Per-request deadline exceeded
    #[error("request to {registry} timed out")]
    Timeout { registry: String },

    /// Registry or token server rejected the credentials
    #[error("authentication failed for registry {registry}: {reason}")]
    Unauthorized { registry: String, reason: String },

    /// Registry answered with something other than 200 or 401
    #[error("unexpected response from {registry}: {status}")]
    UnexpectedStatus { registry: String, status: u16 },

    /// Token server response carried no token
    #[error("invalid token response from {realm}: {reason}")]
    TokenResponse { realm: String, reason: String },

    /// Caller cancelled the operation
    #[error("registry {0} canceled")]
    Cancelled(String),

    /// No endpoint could be derived for the registry
    #[error("no endpoints for registry {0}")]
    NoEndpoints(String),
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

impl RegistryError {
    pub(crate) fn from_reqwest(registry: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RegistryError::Timeout {
                registry: registry.to_string(),
            }
        } else {
            RegistryError::Transport {
                registry: registry.to_string(),
                reason: err.to_string(),
            }
        }
    }

    /// Errors that stop trying further endpoints
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RegistryError::Unauthorized { .. } | RegistryError::Cancelled(_)
        )
    }
}

impl From<RegistryError> for CredentialError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::InvalidConfig(msg) => CredentialError::InvalidParam(msg),
            e @ RegistryError::Unauthorized { .. } => CredentialError::Unauthorized(e.to_string()),
            e @ RegistryError::Timeout { .. } => CredentialError::Timeout(e.to_string()),
            RegistryError::Cancelled(_) => CredentialError::Cancelled("login".to_string()),
            e @ RegistryError::TokenResponse { .. } => CredentialError::Decode(e.to_string()),
            other => CredentialError::Transport(other.to_string()),
        }
    }
}
