//! Config-file credential store
//!
//! Persists credentials in the `auths` section of the CLI config file. The
//! file is only rewritten when the affected entry actually changes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use regcred_core::{auth_config_key, AuthConfig, ConfigFile, CredentialError, Result};

use crate::store::CredentialStore;

/// Config object the file store persists through
pub trait AuthFile: Clone + Send + 'static {
    /// Record stored for a server, matching key aliases
    fn auth_config(&self, server: &str) -> Result<Option<AuthConfig>>;

    /// Every stored record, keyed as written in the file
    fn auth_configs(&self) -> Result<BTreeMap<String, AuthConfig>>;

    /// Upsert a record; returns `true` if the entry changed
    fn set_auth_config(&mut self, record: &AuthConfig) -> bool;

    /// Remove a record; returns `true` if something was removed
    fn remove_auth_config(&mut self, server: &str) -> bool;

    /// Persist the current state
    fn save(&self) -> Result<()>;
}

impl AuthFile for ConfigFile {
    fn auth_config(&self, server: &str) -> Result<Option<AuthConfig>> {
        ConfigFile::auth_config(self, server)
    }

    fn auth_configs(&self) -> Result<BTreeMap<String, AuthConfig>> {
        ConfigFile::auth_configs(self)
    }

    fn set_auth_config(&mut self, record: &AuthConfig) -> bool {
        ConfigFile::set_auth_config(self, record)
    }

    fn remove_auth_config(&mut self, server: &str) -> bool {
        ConfigFile::remove_auth_config(self, server)
    }

    fn save(&self) -> Result<()> {
        ConfigFile::save(self)
    }
}

/// Credential store backed by the config file
pub struct FileStore<F: AuthFile = ConfigFile> {
    file: Arc<Mutex<F>>,
}

impl<F: AuthFile> Clone for FileStore<F> {
    fn clone(&self) -> Self {
        Self {
            file: Arc::clone(&self.file),
        }
    }
}

impl<F: AuthFile> std::fmt::Debug for FileStore<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").finish_non_exhaustive()
    }
}

impl<F: AuthFile> FileStore<F> {
    /// Create a store over a loaded config file
    pub fn new(file: F) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }

    /// Run a closure against the underlying config
    pub fn with_file<R>(&self, f: impl FnOnce(&F) -> R) -> R {
        f(&self.file.lock())
    }

    /// Apply a mutation and save only if it reported a change. On a failed
    /// save the in-memory config is restored, so no partial record survives.
    ///
    /// Runs on the blocking pool since saving syncs and renames the file.
    async fn update<M>(&self, mutate: M) -> Result<bool>
    where
        M: FnOnce(&mut F) -> bool + Send + 'static,
    {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || {
            let mut file = file.lock();
            let snapshot = file.clone();

            if !mutate(&mut file) {
                return Ok(false);
            }

            if let Err(e) = file.save() {
                warn!(error = %e, "failed to save config file, keeping previous credentials");
                *file = snapshot;
                return Err(e);
            }
            Ok(true)
        })
        .await
        .map_err(|e| CredentialError::storage(format!("config file update task failed: {e}")))?
    }
}

#[async_trait]
impl<F: AuthFile> CredentialStore for FileStore<F> {
    async fn get(&self, server: &str) -> Result<Option<AuthConfig>> {
        self.file.lock().auth_config(server)
    }

    async fn get_all(&self) -> Result<BTreeMap<String, AuthConfig>> {
        let records = self.file.lock().auth_configs()?;
        Ok(records
            .into_iter()
            .map(|(server, mut record)| {
                let key = auth_config_key(&server);
                record.server_address = key.clone();
                (key, record)
            })
            .collect())
    }

    async fn store(&self, mut auth: AuthConfig) -> Result<()> {
        auth.server_address = auth_config_key(&auth.server_address);
        if !auth.identity_token.is_empty() {
            // The identity token replaces the password on disk
            auth.password.clear();
        }
        auth.auth.clear();

        let server = auth.server_address.clone();
        let changed = self
            .update(move |file| file.set_auth_config(&auth))
            .await?;
        debug!(server = %server, changed, "stored credentials in config file");
        Ok(())
    }

    async fn erase(&self, server: &str) -> Result<()> {
        let key = server.to_string();
        let changed = self
            .update(move |file| file.remove_auth_config(&key))
            .await?;
        debug!(server = %server, changed, "erased credentials from config file");
        Ok(())
    }
}
