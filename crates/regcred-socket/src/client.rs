//! Credential store backed by a credential server socket
//!
//! Used by a containerised CLI to read and write the host's credentials.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, StatusCode, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::net::UnixStream;
use tracing::debug;

use regcred_core::{AuthConfig, CredentialError};
use regcred_store::CredentialStore;

use crate::error::{ErrorResponse, Result, SocketError};
use crate::handlers::CREDENTIALS_PATH;

/// Connector sending every request to one Unix socket, whatever the URI
#[derive(Clone)]
struct UnixConnector {
    socket_path: PathBuf,
}

impl tower::Service<Uri> for UnixConnector {
    type Response = TokioIo<UnixStream>;
    type Error = std::io::Error;
    type Future = Pin<Box<dyn Future<Output = std::io::Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _uri: Uri) -> Self::Future {
        let path = self.socket_path.clone();
        Box::pin(async move {
            let stream = UnixStream::connect(&path).await?;
            Ok(TokioIo::new(stream))
        })
    }
}

/// Whether a credential server answers on `path`
pub async fn check_credential_server(path: &Path) -> bool {
    UnixStream::connect(path).await.is_ok()
}

/// [`CredentialStore`] talking to a credential server
pub struct SocketStore {
    client: Client<UnixConnector, Full<Bytes>>,
    socket_path: PathBuf,
}

impl std::fmt::Debug for SocketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketStore")
            .field("socket_path", &self.socket_path)
            .finish()
    }
}

impl SocketStore {
    /// Create a store for the server at `socket_path`. No connection is made
    /// until the first request.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        let socket_path = socket_path.into();
        let connector = UnixConnector {
            socket_path: socket_path.clone(),
        };
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            socket_path,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes)> {
        let uri: Uri = format!("http://localhost{path}")
            .parse()
            .map_err(|e| SocketError::Request(format!("invalid request path {path}: {e}")))?;

        let mut builder = hyper::Request::builder()
            .method(method.clone())
            .uri(uri)
            .header("Host", "localhost");
        if body.is_some() {
            builder = builder.header("Content-Type", "application/json");
        }
        let req = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| SocketError::Request(e.to_string()))?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| SocketError::Request(format!("{method} {path}: {e}")))?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| SocketError::Request(format!("reading response body: {e}")))?
            .to_bytes();

        Ok((status, body))
    }

    /// Turn a non-success response into an error, keeping the server's message
    fn check_status(status: StatusCode, body: &[u8]) -> Result<()> {
        if status.is_success() {
            return Ok(());
        }
        let message = serde_json::from_slice::<ErrorResponse>(body)
            .map(|e| e.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
        Err(SocketError::Status {
            status: status.as_u16(),
            message,
        })
    }

    fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> std::result::Result<T, CredentialError> {
        serde_json::from_slice(body)
            .map_err(|e| CredentialError::decode(format!("credential server response: {e}")))
    }
}

#[async_trait]
impl CredentialStore for SocketStore {
    async fn get(&self, server: &str) -> regcred_core::Result<Option<AuthConfig>> {
        let path = key_path(server);
        let (status, body) = self.request(Method::GET, &path, None).await?;
        if status == StatusCode::NOT_FOUND {
            debug!(server = %server, "no credentials on credential server");
            return Ok(None);
        }
        Self::check_status(status, &body)?;
        Self::parse_json(&body).map(Some)
    }

    async fn get_all(&self) -> regcred_core::Result<BTreeMap<String, AuthConfig>> {
        let (status, body) = self.request(Method::GET, CREDENTIALS_PATH, None).await?;
        Self::check_status(status, &body)?;
        Self::parse_json(&body)
    }

    async fn store(&self, auth: AuthConfig) -> regcred_core::Result<()> {
        let body = serde_json::to_vec(&auth)?;
        let (status, body) = self
            .request(Method::POST, CREDENTIALS_PATH, Some(body))
            .await?;
        Self::check_status(status, &body)?;
        Ok(())
    }

    async fn erase(&self, server: &str) -> regcred_core::Result<()> {
        let path = key_path(server);
        let (status, body) = self.request(Method::DELETE, &path, None).await?;
        Self::check_status(status, &body)?;
        Ok(())
    }
}

/// `/credentials?key=<server>`, form-encoded
fn key_path(server: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("key", server)
        .finish();
    format!("{CREDENTIALS_PATH}?{query}")
}
