//! Credential server on a Unix domain socket
//!
//! Serves a [`SharedStore`] over HTTP/1.1 until the caller cancels or no
//! connection has been open for the idle timeout.

use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use regcred_store::SharedStore;

use crate::client::check_credential_server;
use crate::error::{Result, SocketError};
use crate::handlers::build_router;

/// Shut down after this long without any open connection
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Read, write and keep-alive deadline for each request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How long in-flight requests may take to drain on shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Credential server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub idle_timeout: Duration,
    pub request_timeout: Duration,
}

impl ServerConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// Why the server stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Idle,
    Cancelled,
}

/// A bound credential server
pub struct CredentialServer {
    listener: UnixListener,
    config: ServerConfig,
    store: SharedStore,
}

impl std::fmt::Debug for CredentialServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CredentialServer {
    /// Bind the socket, replacing a stale socket file left by a crashed server.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::AlreadyRunning`] if another server answers on
    /// the socket, or an IO error if the socket cannot be bound.
    pub async fn bind(store: SharedStore, config: ServerConfig) -> Result<Self> {
        let path = &config.socket_path;
        prepare_socket_dir(path)?;

        if path.exists() {
            if check_credential_server(path).await {
                return Err(SocketError::AlreadyRunning(path.clone()));
            }
            debug!(path = %path.display(), "removing stale credential socket");
            std::fs::remove_file(path).map_err(|e| SocketError::io(path, e))?;
        }

        let listener = UnixListener::bind(path).map_err(|e| SocketError::io(path, e))?;
        info!(path = %path.display(), "credential server listening");

        Ok(Self {
            listener,
            config,
            store,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Serve until cancelled or idle, then drain in-flight requests and
    /// remove the socket file.
    pub async fn run(self, cancel: CancellationToken) -> Result<ShutdownReason> {
        let Self {
            listener,
            config,
            store,
        } = self;

        let service = TowerToHyperService::new(build_router(store, config.request_timeout));
        let graceful = GracefulShutdown::new();
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<()>();

        let idle = sleep(config.idle_timeout);
        tokio::pin!(idle);
        let mut active: usize = 0;

        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("credential server cancelled");
                    break ShutdownReason::Cancelled;
                }

                _ = &mut idle, if active == 0 => {
                    info!(idle = ?config.idle_timeout, "credential server idle, shutting down");
                    break ShutdownReason::Idle;
                }

                Some(()) = closed_rx.recv() => {
                    active = active.saturating_sub(1);
                    debug!(active, "connection closed");
                    if active == 0 {
                        idle.as_mut().reset(Instant::now() + config.idle_timeout);
                    }
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            active += 1;
                            debug!(active, "connection opened");

                            let connection = http1::Builder::new()
                                .timer(TokioTimer::new())
                                .header_read_timeout(config.request_timeout)
                                .serve_connection(TokioIo::new(stream), service.clone());
                            let connection = graceful.watch(connection);
                            let closed_tx = closed_tx.clone();

                            tokio::spawn(async move {
                                if let Err(e) = connection.await {
                                    debug!(error = %e, "connection error");
                                }
                                let _ = closed_tx.send(());
                            });
                        }
                        Err(e) => accept_error_backoff(&e).await,
                    }
                }
            }
        };

        drop(listener);
        if tokio::time::timeout(DRAIN_TIMEOUT, graceful.shutdown())
            .await
            .is_err()
        {
            warn!("timed out draining credential server connections");
        }

        if let Err(e) = std::fs::remove_file(&config.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, path = %config.socket_path.display(), "failed to remove credential socket");
            }
        }
        info!(?reason, "credential server stopped");
        Ok(reason)
    }
}

async fn accept_error_backoff(error: &std::io::Error) {
    warn!(error = %error, backoff = ?ACCEPT_ERROR_BACKOFF, "failed to accept connection");
    sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Create the socket directory, private to the owner on unix
fn prepare_socket_dir(path: &Path) -> Result<()> {
    let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) else {
        return Ok(());
    };
    if dir.exists() {
        return Ok(());
    }

    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).map_err(|e| SocketError::io(dir, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accept_error_backs_off() {
        let started = Instant::now();
        accept_error_backoff(&std::io::Error::from_raw_os_error(24)).await;
        assert!(started.elapsed() >= ACCEPT_ERROR_BACKOFF);
    }

    #[test]
    fn test_prepare_socket_dir_is_private() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("run").join("credentials.sock");
        prepare_socket_dir(&socket).unwrap();
        assert!(socket.parent().unwrap().is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(socket.parent().unwrap())
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }
}
