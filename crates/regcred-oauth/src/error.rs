//! OAuth error types

use thiserror::Error;

use regcred_core::CredentialError;

/// Errors raised while talking to the OAuth tenant
#[derive(Debug, Error)]
pub enum OAuthError {
    /// HTTP request failed before a response was received
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The tenant answered with an OAuth error
    #[error("tenant error ({status}): {error}: {description}")]
    Tenant {
        status: u16,
        error: String,
        description: String,
    },

    /// The user has not finished the device login yet
    #[error("authorization pending")]
    AuthorizationPending,

    /// The tenant asked to poll less often
    #[error("slow down")]
    SlowDown,

    /// The device code expired before the user finished
    #[error("device code expired")]
    Expired,

    /// Token could not be parsed as a JWT
    #[error("invalid JWT: {0}")]
    Jwt(String),

    /// Response body was not what the tenant protocol promises
    #[error("unexpected tenant response: {0}")]
    Decode(String),
}

/// Result type for tenant operations
pub type Result<T> = std::result::Result<T, OAuthError>;

/// OAuth error codes meaning the grant itself was refused
const REJECTED_GRANT_ERRORS: &[&str] = &[
    "access_denied",
    "invalid_grant",
    "invalid_client",
    "unauthorized_client",
];

impl OAuthError {
    /// Whether the tenant refused the grant outright
    pub fn is_rejection(&self) -> bool {
        match self {
            OAuthError::Tenant { status, error, .. } => {
                REJECTED_GRANT_ERRORS.contains(&error.as_str()) || matches!(status, 401 | 403)
            }
            _ => false,
        }
    }
}

impl From<OAuthError> for CredentialError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::Http(e) if e.is_timeout() => {
                CredentialError::Timeout(format!("oauth tenant: {e}"))
            }
            OAuthError::Http(e) => CredentialError::Transport(format!("oauth tenant: {e}")),
            e @ OAuthError::Tenant { .. } if e.is_rejection() => {
                CredentialError::Unauthorized(e.to_string())
            }
            OAuthError::Expired => CredentialError::Timeout("device code expired".to_string()),
            OAuthError::Jwt(msg) | OAuthError::Decode(msg) => CredentialError::Decode(msg),
            other => CredentialError::Transport(other.to_string()),
        }
    }
}
