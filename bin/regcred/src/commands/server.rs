use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use regcred_core::CredentialError;
use regcred_socket::{CredentialServer, ServerConfig, ShutdownReason};

use crate::app::App;

/// Handle credential-server command
pub(crate) async fn handle_credential_server(app: &App, idle_timeout: Duration) -> Result<()> {
    if app.uses_credential_server() {
        return Err(CredentialError::invalid(
            "the credential server cannot serve from another credential server",
        )
        .into());
    }

    // Nobody is at the terminal to confirm a device code
    let backing = app.local_store(app.load_config()?);
    let store = app.oauth_store(backing, false)?;

    let config = ServerConfig::new(app.env.credential_socket_path()).with_idle_timeout(idle_timeout);
    let server = CredentialServer::bind(Arc::new(store), config)
        .await
        .map_err(CredentialError::from)
        .context("Failed to start credential server")?;

    println!("Credential server listening on {}", server.socket_path().display());

    let reason = server
        .run(app.cancel.clone())
        .await
        .map_err(CredentialError::from)
        .context("Credential server failed")?;

    match reason {
        ShutdownReason::Idle => info!(?idle_timeout, "no connections left, shut down"),
        ShutdownReason::Cancelled => info!("interrupted, shut down"),
    }
    Ok(())
}
