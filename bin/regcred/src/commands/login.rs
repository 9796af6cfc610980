use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use regcred_core::{
    auth_config_key, convert_to_hostname, is_index_server, AuthConfig, CredentialError,
    INDEX_SERVER,
};
use regcred_registry::{RegistryError, LOGIN_SUCCEEDED};
use regcred_store::CredentialStore;

use crate::app::App;

/// Handle login command
pub(crate) async fn handle_login(
    app: &App,
    server: Option<&str>,
    username: Option<&str>,
    password: Option<&str>,
    password_stdin: bool,
) -> Result<()> {
    app.warn_env_credentials();

    let key = server
        .map(auth_config_key)
        .unwrap_or_else(|| INDEX_SERVER.to_string());

    if is_index_server(&key) && username.is_none() && password.is_none() {
        return web_login(app).await;
    }

    let password = if password_stdin {
        let mut raw = String::new();
        tokio::io::stdin()
            .read_to_string(&mut raw)
            .await
            .context("Failed to read password from stdin")?;
        Some(secret_from_stdin(&raw)?)
    } else {
        if password.is_some() {
            eprintln!("WARNING! Using --password via the CLI is insecure. Use --password-stdin.");
        }
        password.map(str::to_string)
    };

    let store = app.store().await?;
    let config = app.load_config()?;
    let client = app.registry_client(&config)?;
    let hostname = convert_to_hostname(&key);

    let username = match username {
        Some(username) => username.to_string(),
        None => {
            if password.is_none() {
                if let Some(existing) = stored_credentials(store.as_ref(), &key).await {
                    println!("Authenticating with existing credentials...");
                    match client.login(&existing, &app.cancel).await {
                        Ok(result) => {
                            println!("{}", result.status);
                            return Ok(());
                        }
                        Err(e @ RegistryError::Cancelled(_)) => {
                            return Err(CredentialError::from(e).into());
                        }
                        Err(e) => debug!(error = %e, "stored credentials rejected"),
                    }
                }
            }
            prompt_username(&hostname).await?
        }
    };

    let password = password.ok_or_else(|| {
        CredentialError::invalid("a password is required: pass --password-stdin or --password")
    })?;
    if username.is_empty() || password.is_empty() {
        return Err(CredentialError::invalid("username and password must not be empty").into());
    }

    let mut auth = AuthConfig::new(key.clone(), username, password);
    let result = client
        .login(&auth, &app.cancel)
        .await
        .map_err(CredentialError::from)
        .with_context(|| format!("Login to {hostname} failed"))?;

    if let Some(token) = result.identity_token {
        debug!(server = %key, "registry issued an identity token");
        auth.password.clear();
        auth.identity_token = token;
    }

    store
        .store(auth)
        .await
        .context("Failed to store credentials")?;

    info!(server = %key, "logged in");
    println!("{}", result.status);
    Ok(())
}

/// Device-code login for the canonical index
async fn web_login(app: &App) -> Result<()> {
    if app.uses_credential_server() {
        return Err(CredentialError::invalid(
            "web-based login needs the local store; pass --username or drop --credential-socket",
        )
        .into());
    }

    let backing = app.local_store(app.load_config()?);
    let store = app.oauth_store(backing, true)?;
    let view = store.login().await.context("Web-based login failed")?;

    info!(username = %view.username, "logged in with device code");
    println!("{LOGIN_SUCCEEDED}");
    Ok(())
}

/// A stored record complete enough to log in with
async fn stored_credentials(store: &dyn CredentialStore, key: &str) -> Option<AuthConfig> {
    match store.get(key).await {
        Ok(Some(record)) if record.is_authenticated() => Some(record),
        Ok(_) => None,
        Err(e) => {
            debug!(server = %key, error = %e, "could not read stored credentials");
            None
        }
    }
}

async fn prompt_username(hostname: &str) -> Result<String> {
    let mut stderr = tokio::io::stderr();
    stderr
        .write_all(format!("Username for {hostname}: ").as_bytes())
        .await?;
    stderr.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read username")?;
    Ok(line.trim().to_string())
}

/// Password piped on stdin, without the trailing newline
fn secret_from_stdin(raw: &str) -> Result<String> {
    let secret = raw.trim_end_matches(['\n', '\r']);
    if secret.is_empty() {
        return Err(CredentialError::invalid("password on stdin is empty").into());
    }
    Ok(secret.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_from_stdin() {
        assert_eq!(secret_from_stdin("hunter2\n").unwrap(), "hunter2");
        assert_eq!(secret_from_stdin("hunter2\r\n").unwrap(), "hunter2");
        assert_eq!(secret_from_stdin("  spaced  \n").unwrap(), "  spaced  ");

        let err = secret_from_stdin("\n").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CredentialError>(),
            Some(CredentialError::InvalidParam(_))
        ));
    }

    #[tokio::test]
    async fn test_stored_credentials_requires_secret() {
        use regcred_store::MemoryStore;

        let store = MemoryStore::new();
        store
            .store(AuthConfig {
                username: "alice".to_string(),
                server_address: "registry.example.com".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(stored_credentials(&store, "registry.example.com").await.is_none());

        store
            .store(AuthConfig::new("registry.example.com", "alice", "pw"))
            .await
            .unwrap();
        let found = stored_credentials(&store, "registry.example.com").await.unwrap();
        assert_eq!(found.password, "pw");
    }
}
