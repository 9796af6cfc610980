//! Credential socket error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use regcred_core::CredentialError;

/// Errors raised by the credential server and its client
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another server already answers on the socket
    #[error("credential server already running at {0}")]
    AlreadyRunning(PathBuf),

    /// Request could not be sent or its response read
    #[error("request to credential server failed: {0}")]
    Request(String),

    /// Server answered with an error status
    #[error("credential server error ({status}): {message}")]
    Status { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, SocketError>;

impl SocketError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SocketError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<SocketError> for CredentialError {
    fn from(err: SocketError) -> Self {
        match err {
            SocketError::Io { path, source } => CredentialError::io(path, source),
            SocketError::Status { status: 400, message } => CredentialError::InvalidParam(message),
            SocketError::Status { status: 401 | 403, message } => {
                CredentialError::Unauthorized(message)
            }
            SocketError::Status { status: 408, message } => CredentialError::Timeout(message),
            SocketError::Status { status: 422, message } => CredentialError::Decode(message),
            other => CredentialError::StorageUnavailable(other.to_string()),
        }
    }
}

/// Error returned by the HTTP handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// JSON error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Unprocessable(_) => (StatusCode::UNPROCESSABLE_ENTITY, "decode_error"),
            ApiError::Timeout(_) => (StatusCode::REQUEST_TIMEOUT, "timeout"),
            ApiError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
            }
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::InvalidParam(msg) => ApiError::BadRequest(msg),
            CredentialError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            CredentialError::Decode(msg) => ApiError::Unprocessable(msg),
            CredentialError::Timeout(msg) => ApiError::Timeout(msg),
            other => ApiError::ServiceUnavailable(other.to_string()),
        }
    }
}
