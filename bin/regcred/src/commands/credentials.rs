use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use tokio::io::AsyncReadExt;

use regcred_core::{auth_config_key, AuthConfig, CredentialError};
use regcred_store::CredentialStore;

use crate::app::App;
use crate::cli::CredentialsCommand;

/// Handle credentials subcommands
pub(crate) async fn handle_credentials(app: &App, command: &CredentialsCommand) -> Result<()> {
    app.warn_env_credentials();
    let store = app.store().await?;

    match command {
        CredentialsCommand::Get { server } => {
            let Some(record) = store
                .get(server)
                .await
                .with_context(|| format!("Failed to read credentials for {server}"))?
            else {
                bail!("no credentials stored for {}", auth_config_key(server));
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        CredentialsCommand::List => {
            let records = store.get_all().await.context("Failed to list credentials")?;
            println!("{}", serde_json::to_string_pretty(&usernames(records))?);
        }
        CredentialsCommand::Store => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("Failed to read record from stdin")?;
            let record = parse_record(&raw)?;
            let key = record.server_address.clone();
            store
                .store(record)
                .await
                .with_context(|| format!("Failed to store credentials for {key}"))?;
        }
        CredentialsCommand::Erase { server } => {
            store
                .erase(server)
                .await
                .with_context(|| format!("Failed to erase credentials for {server}"))?;
        }
    }

    Ok(())
}

/// Server to username, leaving secrets out of listings
fn usernames(records: BTreeMap<String, AuthConfig>) -> BTreeMap<String, String> {
    records
        .into_iter()
        .map(|(server, record)| (server, record.username))
        .collect()
}

/// A record from stdin: engine `AuthConfig` JSON with a server address
fn parse_record(raw: &str) -> Result<AuthConfig> {
    let record: AuthConfig = serde_json::from_str(raw).map_err(CredentialError::from)?;
    if record.server_address.is_empty() {
        return Err(CredentialError::invalid("record has no serveraddress").into());
    }
    Ok(record.with_decoded_auth()?)
}
