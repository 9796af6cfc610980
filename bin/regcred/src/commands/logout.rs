use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::info;

use regcred_core::{auth_config_key, convert_to_hostname, is_index_server, INDEX_SERVER};
use regcred_oauth::open_browser;
use regcred_store::{CredentialStore, SharedStore};

use crate::app::App;

/// Handle logout command
pub(crate) async fn handle_logout(app: &App, server: Option<&str>) -> Result<()> {
    app.warn_env_credentials();

    let key = server
        .map(auth_config_key)
        .unwrap_or_else(|| INDEX_SERVER.to_string());
    let hostname = convert_to_hostname(&key);

    let backend = app.backend().await?;
    let Some(record) = backend
        .get(&key)
        .await
        .with_context(|| format!("Failed to read credentials for {hostname}"))?
    else {
        println!("Not logged in to {hostname}");
        return Ok(());
    };

    // Token pairs come from the device flow and have a browser session too
    let web_session = is_index_server(&key) && record.token_pair().is_some();

    let (store, logout_url): (SharedStore, Option<String>) = if app.uses_credential_server() {
        (backend, None)
    } else {
        let oauth = app.oauth_store(backend, false)?;
        let url = web_session.then(|| oauth.tenant().logout_url());
        (Arc::new(oauth), url)
    };

    println!("Removing login credentials for {hostname}");
    store
        .erase(&key)
        .await
        .with_context(|| format!("Failed to remove credentials for {hostname}"))?;
    info!(server = %key, "logged out");

    if let Some(url) = logout_url {
        println!("To end the browser session, visit {url}");
        if std::io::stdout().is_terminal() {
            open_browser(&url);
        }
    }

    Ok(())
}
