//! Credential socket
//!
//! [`CredentialServer`] re-exports a credential store over HTTP on a Unix
//! domain socket inside the config directory; [`SocketStore`] is the
//! matching client-side store.
//!
//! Resource: `GET /credentials[?key=]`, `POST /credentials`,
//! `DELETE /credentials?key=`.

pub mod client;
pub mod error;
pub mod handlers;
pub mod server;

pub use client::{check_credential_server, SocketStore};
pub use error::{ApiError, ErrorResponse, Result, SocketError};
pub use handlers::{build_router, CREDENTIALS_PATH};
pub use server::{
    CredentialServer, ServerConfig, ShutdownReason, DEFAULT_IDLE_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
};
