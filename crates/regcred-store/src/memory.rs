//! In-memory and environment overlay stores
//!
//! [`MemoryStore`] overlays a map of records on top of an optional fallback
//! store. [`EnvStore`] fills that map from `DOCKER_AUTH_CONFIG` once, at
//! construction.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use regcred_core::{
    auth_config_key, AuthConfig, AuthEntry, ConfigFile, Environment, Result, ENV_AUTH_CONFIG,
};

use crate::store::{CredentialStore, SharedStore};

/// Printed by interactive commands while `DOCKER_AUTH_CONFIG` is set
pub const ENV_CREDENTIALS_WARNING: &str = "WARNING: credentials from the DOCKER_AUTH_CONFIG \
environment variable take precedence over stored credentials. \
Unset DOCKER_AUTH_CONFIG to use the configured credential store.";

/// Records held in memory, consulted before the fallback store
#[derive(Debug, Default)]
pub struct MemoryStore {
    memory: RwLock<BTreeMap<String, AuthConfig>>,
    fallback: Option<SharedStore>,
}

impl MemoryStore {
    /// Memory-only store
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay `records` on top of `fallback`
    pub fn with_fallback(
        records: impl IntoIterator<Item = AuthConfig>,
        fallback: Option<SharedStore>,
    ) -> Self {
        let memory = records
            .into_iter()
            .map(|mut record| {
                let key = auth_config_key(&record.server_address);
                record.server_address = key.clone();
                (key, record)
            })
            .collect();
        Self {
            memory: RwLock::new(memory),
            fallback,
        }
    }

    /// Number of records held in memory
    pub fn len(&self) -> usize {
        self.memory.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.read().is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, server: &str) -> Result<Option<AuthConfig>> {
        let key = auth_config_key(server);
        let hit = self.memory.read().get(&key).cloned();
        if hit.is_some() {
            return Ok(hit);
        }
        match &self.fallback {
            Some(fallback) => fallback.get(server).await,
            None => Ok(None),
        }
    }

    async fn get_all(&self) -> Result<BTreeMap<String, AuthConfig>> {
        let mut records = match &self.fallback {
            Some(fallback) => fallback.get_all().await?,
            None => BTreeMap::new(),
        };
        for (key, record) in self.memory.read().iter() {
            records.insert(key.clone(), record.clone());
        }
        Ok(records)
    }

    async fn store(&self, mut auth: AuthConfig) -> Result<()> {
        auth.server_address = auth_config_key(&auth.server_address);
        if let Some(fallback) = &self.fallback {
            fallback.store(auth.clone()).await?;
        }
        self.memory
            .write()
            .insert(auth.server_address.clone(), auth);
        Ok(())
    }

    async fn erase(&self, server: &str) -> Result<()> {
        let key = auth_config_key(server);
        self.memory.write().remove(&key);
        if let Some(fallback) = &self.fallback {
            fallback.erase(server).await?;
        }
        Ok(())
    }
}

/// Credential overlay sourced from `DOCKER_AUTH_CONFIG`
#[derive(Debug)]
pub struct EnvStore {
    inner: MemoryStore,
}

impl EnvStore {
    /// Wrap `fallback` with the records found in the environment.
    ///
    /// When the variable is unset or cannot be parsed, `fallback` is returned
    /// unchanged.
    pub fn wrap(env: &Environment, fallback: SharedStore) -> SharedStore {
        let Some(raw) = env.auth_config.as_deref() else {
            return fallback;
        };

        match parse_env_auth_config(raw) {
            Ok(records) => {
                debug!(count = records.len(), "loaded credentials from {ENV_AUTH_CONFIG}");
                Arc::new(Self {
                    inner: MemoryStore::with_fallback(records, Some(fallback)),
                })
            }
            Err(e) => {
                warn!(error = %e, "ignoring malformed {ENV_AUTH_CONFIG}");
                fallback
            }
        }
    }

    /// Warning interactive commands print while the overlay is active
    pub fn warning() -> &'static str {
        ENV_CREDENTIALS_WARNING
    }
}

#[async_trait]
impl CredentialStore for EnvStore {
    async fn get(&self, server: &str) -> Result<Option<AuthConfig>> {
        self.inner.get(server).await
    }

    async fn get_all(&self) -> Result<BTreeMap<String, AuthConfig>> {
        self.inner.get_all().await
    }

    async fn store(&self, auth: AuthConfig) -> Result<()> {
        self.inner.store(auth).await
    }

    async fn erase(&self, server: &str) -> Result<()> {
        self.inner.erase(server).await
    }
}

/// Parse `DOCKER_AUTH_CONFIG`: either a full config document with an
/// `auths` section, or a bare `{server: entry}` map.
pub fn parse_env_auth_config(raw: &str) -> Result<Vec<AuthConfig>> {
    let config = ConfigFile::parse(raw)?;
    let entries = if config.auths.is_empty() {
        serde_json::from_str::<BTreeMap<String, AuthEntry>>(raw)?
    } else {
        config.auths
    };

    entries
        .iter()
        .map(|(server, entry)| entry.to_auth_config(server))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use regcred_core::{encode_auth, INDEX_SERVER};

    fn fallback_with(record: AuthConfig) -> SharedStore {
        Arc::new(MemoryStore::with_fallback([record], None))
    }

    #[tokio::test]
    async fn test_memory_wins_over_fallback() {
        let fallback = fallback_with(AuthConfig::new("r.test", "fileu", "filep"));
        let store = MemoryStore::with_fallback(
            [AuthConfig::new("r.test", "memu", "memp")],
            Some(fallback),
        );

        let record = store.get("r.test").await.unwrap().unwrap();
        assert_eq!(record.username, "memu");

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["r.test"].username, "memu");
    }

    #[tokio::test]
    async fn test_falls_through_to_fallback() {
        let fallback = fallback_with(AuthConfig::new("other.test", "u", "p"));
        let store = MemoryStore::with_fallback([], Some(fallback.clone()));

        assert_eq!(store.get("other.test").await.unwrap().unwrap().username, "u");

        store
            .store(AuthConfig::new("new.test", "n", "p"))
            .await
            .unwrap();
        assert!(fallback.get("new.test").await.unwrap().is_some());

        store.erase("new.test").await.unwrap();
        assert!(store.get("new.test").await.unwrap().is_none());
        assert!(fallback.get("new.test").await.unwrap().is_none());
    }

    #[test]
    fn test_parse_env_forms() {
        let auth = encode_auth("envu", "envp");

        let full = format!(r#"{{"auths":{{"docker.io":{{"auth":"{auth}"}}}}}}"#);
        let records = parse_env_auth_config(&full).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].username, "envu");
        assert_eq!(records[0].password, "envp");

        let bare = format!(r#"{{"{INDEX_SERVER}":{{"username":"envu","auth":"{auth}"}}}}"#);
        let records = parse_env_auth_config(&bare).unwrap();
        assert_eq!(records[0].server_address, INDEX_SERVER);
        assert_eq!(records[0].password, "envp");
    }

    #[tokio::test]
    async fn test_malformed_env_degrades_to_fallback() {
        let fallback = fallback_with(AuthConfig::new("r.test", "u", "p"));
        let env = Environment {
            auth_config: Some("{not json".to_string()),
            ..Default::default()
        };

        let store = EnvStore::wrap(&env, fallback);
        assert_eq!(store.get("r.test").await.unwrap().unwrap().username, "u");
    }
}
