//! Native credential helper store
//!
//! Secrets live in an OS keychain reached through a `docker-credential-*`
//! helper. Fields the helper protocol cannot carry (email) stay in the
//! config file store underneath.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use regcred_core::{auth_config_key, AuthConfig, CredentialError, Result};

use crate::helper::{HelperCredentials, HelperVerb, Program, TOKEN_USERNAME};
use crate::store::{CredentialStore, SharedStore};

/// Credential store backed by an external helper program
#[derive(Clone)]
pub struct NativeStore {
    program: Arc<dyn Program>,
    file: SharedStore,
}

impl std::fmt::Debug for NativeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeStore")
            .field("helper", &self.program.name())
            .finish_non_exhaustive()
    }
}

impl NativeStore {
    /// Create a native store; `file` keeps the non-secret fields
    pub fn new(program: Arc<dyn Program>, file: SharedStore) -> Self {
        Self { program, file }
    }

    /// Name of the helper this store talks to
    pub fn helper_name(&self) -> &str {
        self.program.name()
    }

    async fn helper_get(&self, server: &str) -> Result<Option<AuthConfig>> {
        let out = match self.program.run(HelperVerb::Get, server.as_bytes()).await {
            Ok(out) => out,
            Err(failure) if failure.is_not_found_message() => return Ok(None),
            Err(failure) => return Err(failure.into_error(self.program.name(), HelperVerb::Get)),
        };

        let creds: HelperCredentials = serde_json::from_slice(&out).map_err(|e| {
            CredentialError::decode(format!(
                "malformed output from docker-credential-{} get: {e}",
                self.program.name()
            ))
        })?;

        let mut record = AuthConfig {
            server_address: server.to_string(),
            ..Default::default()
        };
        if creds.username == TOKEN_USERNAME {
            record.identity_token = creds.secret;
        } else {
            record.username = creds.username;
            record.password = creds.secret;
        }
        Ok(Some(record))
    }

    async fn helper_list(&self) -> Result<BTreeMap<String, String>> {
        let out = self
            .program
            .run(HelperVerb::List, b"")
            .await
            .map_err(|failure| failure.into_error(self.program.name(), HelperVerb::List))?;

        if out.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        serde_json::from_slice(&out).map_err(|e| {
            CredentialError::decode(format!(
                "malformed output from docker-credential-{} list: {e}",
                self.program.name()
            ))
        })
    }
}

/// Only the fields the config file keeps alongside a helper
fn file_part(record: &AuthConfig) -> AuthConfig {
    AuthConfig {
        email: record.email.clone(),
        server_address: record.server_address.clone(),
        ..Default::default()
    }
}

/// The fields a helper compares and stores
fn secret_part(record: &AuthConfig) -> (String, String) {
    if record.identity_token.is_empty() {
        (record.username.clone(), record.password.clone())
    } else {
        (TOKEN_USERNAME.to_string(), record.identity_token.clone())
    }
}

#[async_trait]
impl CredentialStore for NativeStore {
    async fn get(&self, server: &str) -> Result<Option<AuthConfig>> {
        let key = auth_config_key(server);
        let file_record = self.file.get(&key).await?;
        let helper_record = self.helper_get(&key).await?;

        Ok(match (helper_record, file_record) {
            (Some(mut record), file) => {
                if let Some(file) = file {
                    record.email = file.email;
                }
                Some(record)
            }
            (None, Some(file)) => Some(file_part(&file)),
            (None, None) => None,
        })
    }

    async fn get_all(&self) -> Result<BTreeMap<String, AuthConfig>> {
        let mut records: BTreeMap<String, AuthConfig> = self
            .file
            .get_all()
            .await?
            .into_iter()
            .map(|(server, record)| (server, file_part(&record)))
            .collect();

        for (server, username) in self.helper_list().await? {
            let key = auth_config_key(&server);
            let entry = records.entry(key.clone()).or_insert_with(|| AuthConfig {
                server_address: key,
                ..Default::default()
            });
            if username != TOKEN_USERNAME {
                entry.username = username;
            }
        }
        Ok(records)
    }

    async fn store(&self, mut auth: AuthConfig) -> Result<()> {
        auth.server_address = auth_config_key(&auth.server_address);
        let (username, secret) = secret_part(&auth);

        if !secret.is_empty() {
            let current = self.helper_get(&auth.server_address).await?;
            let unchanged = current
                .as_ref()
                .map(|c| secret_part(c) == (username.clone(), secret.clone()))
                .unwrap_or(false);

            if unchanged {
                debug!(server = %auth.server_address, helper = self.program.name(), "helper credentials unchanged");
            } else {
                let payload = serde_json::to_vec(&HelperCredentials {
                    server_url: auth.server_address.clone(),
                    username,
                    secret,
                })?;
                self.program
                    .run(HelperVerb::Store, &payload)
                    .await
                    .map_err(|failure| failure.into_error(self.program.name(), HelperVerb::Store))?;
                debug!(server = %auth.server_address, helper = self.program.name(), "stored credentials in helper");
            }
        }

        self.file.store(file_part(&auth)).await
    }

    async fn erase(&self, server: &str) -> Result<()> {
        let key = auth_config_key(server);
        match self.program.run(HelperVerb::Erase, key.as_bytes()).await {
            Ok(_) => {}
            Err(failure) if failure.is_not_found_message() => {}
            Err(failure) => {
                let err = failure.into_error(self.program.name(), HelperVerb::Erase);
                warn!(server = %key, error = %err, "failed to erase credentials from helper");
                return Err(err);
            }
        }
        self.file.erase(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileStore;
    use crate::helper::{HelperFailure, ERR_CREDENTIALS_NOT_FOUND};
    use parking_lot::Mutex;
    use regcred_core::ConfigFile;

    /// In-memory helper recording every call
    #[derive(Default)]
    struct FakeHelper {
        secrets: Mutex<BTreeMap<String, HelperCredentials>>,
        calls: Mutex<Vec<HelperVerb>>,
    }

    impl FakeHelper {
        fn count(&self, verb: HelperVerb) -> usize {
            self.calls.lock().iter().filter(|v| **v == verb).count()
        }
    }

    #[async_trait]
    impl Program for FakeHelper {
        fn name(&self) -> &str {
            "fake"
        }

        async fn run(
            &self,
            verb: HelperVerb,
            input: &[u8],
        ) -> std::result::Result<Vec<u8>, HelperFailure> {
            self.calls.lock().push(verb);
            let not_found = || HelperFailure::Exited(ERR_CREDENTIALS_NOT_FOUND.to_string());
            let mut secrets = self.secrets.lock();
            match verb {
                HelperVerb::Store => {
                    let creds: HelperCredentials = serde_json::from_slice(input).unwrap();
                    secrets.insert(creds.server_url.clone(), creds);
                    Ok(Vec::new())
                }
                HelperVerb::Get => {
                    let server = String::from_utf8_lossy(input).to_string();
                    let creds = secrets.get(&server).ok_or_else(not_found)?;
                    Ok(serde_json::to_vec(creds).unwrap())
                }
                HelperVerb::Erase => {
                    let server = String::from_utf8_lossy(input).to_string();
                    secrets.remove(&server).map(|_| Vec::new()).ok_or_else(not_found)
                }
                HelperVerb::List => {
                    let list: BTreeMap<_, _> = secrets
                        .iter()
                        .map(|(k, v)| (k.clone(), v.username.clone()))
                        .collect();
                    Ok(serde_json::to_vec(&list).unwrap())
                }
            }
        }
    }

    fn native_store(dir: &tempfile::TempDir) -> (NativeStore, Arc<FakeHelper>) {
        let helper = Arc::new(FakeHelper::default());
        let config = ConfigFile::load_from_dir(dir.path()).unwrap();
        let file: SharedStore = Arc::new(FileStore::new(config));
        (NativeStore::new(helper.clone(), file), helper)
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let (store, helper) = native_store(&dir);
        let record = AuthConfig {
            email: "u@example.com".to_string(),
            ..AuthConfig::new("r.test", "u", "p")
        };

        store.store(record.clone()).await.unwrap();
        store.store(record.clone()).await.unwrap();

        assert_eq!(helper.count(HelperVerb::Store), 1);
        assert_eq!(store.get("r.test").await.unwrap(), Some(record));

        // The secret never reaches the config file
        let on_disk = std::fs::read_to_string(dir.path().join("config.json")).unwrap();
        assert!(on_disk.contains("u@example.com"));
        assert!(!on_disk.contains("auth\""));
    }

    #[tokio::test]
    async fn test_get_absent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = native_store(&dir);
        assert_eq!(store.get("missing.test").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_identity_token_marker() {
        let dir = tempfile::tempdir().unwrap();
        let (store, helper) = native_store(&dir);
        let record = AuthConfig {
            identity_token: "idt".to_string(),
            server_address: "r.test".to_string(),
            ..Default::default()
        };
        store.store(record).await.unwrap();

        let stored = helper.secrets.lock().get("r.test").cloned().unwrap();
        assert_eq!(stored.username, TOKEN_USERNAME);

        let got = store.get("r.test").await.unwrap().unwrap();
        assert_eq!(got.identity_token, "idt");
        assert!(got.username.is_empty());
        assert!(got.password.is_empty());
    }

    #[tokio::test]
    async fn test_erase_absent_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let (store, helper) = native_store(&dir);
        store.erase("missing.test").await.unwrap();
        assert_eq!(helper.count(HelperVerb::Erase), 1);
    }

    #[tokio::test]
    async fn test_get_all_lists_usernames_only() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = native_store(&dir);
        store
            .store(AuthConfig::new("r.test", "u", "p"))
            .await
            .unwrap();

        let all = store.get_all().await.unwrap();
        let record = &all["r.test"];
        assert_eq!(record.username, "u");
        assert!(record.password.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_helper_output() {
        struct Garbage;

        #[async_trait]
        impl Program for Garbage {
            fn name(&self) -> &str {
                "garbage"
            }
            async fn run(
                &self,
                _verb: HelperVerb,
                _input: &[u8],
            ) -> std::result::Result<Vec<u8>, HelperFailure> {
                Ok(b"not json".to_vec())
            }
        }

        let file: SharedStore = Arc::new(FileStore::new(ConfigFile::default()));
        let store = NativeStore::new(Arc::new(Garbage), file);
        let err = store.get("r.test").await.unwrap_err();
        assert!(matches!(err, CredentialError::Decode(_)));
    }
}
