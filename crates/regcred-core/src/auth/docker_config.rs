//! CLI config file (`config.json`)
//!
//! Parses and rewrites the config file used by container CLIs to store
//! registry credentials and helper settings. Fields this crate does not know
//! about are kept in `extra` and written back verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::resolver::auth_config_key;
use super::types::{encode_auth, AuthConfig};
use crate::error::{CredentialError, Result};

/// File name of the CLI config inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Parsed CLI config file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigFile {
    #[serde(default)]
    pub auths: BTreeMap<String, AuthEntry>,

    /// Default credential helper for every registry
    #[serde(rename = "credsStore", default, skip_serializing_if = "Option::is_none")]
    pub creds_store: Option<String>,

    /// Per-registry credential helpers
    #[serde(
        rename = "credHelpers",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub cred_helpers: BTreeMap<String, String>,

    /// Extra headers sent with every registry request
    #[serde(
        rename = "HttpHeaders",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub http_headers: BTreeMap<String, String>,

    #[serde(rename = "detachKeys", default, skip_serializing_if = "Option::is_none")]
    pub detach_keys: Option<String>,

    /// Everything else (proxies, formats, plugins...) preserved as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,

    #[serde(skip)]
    filename: PathBuf,
}

/// Authentication entry in the config file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthEntry {
    /// Base64-encoded "username:password"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,

    /// Plain username (alternative to auth field)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Plain password (alternative to auth field)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(rename = "identitytoken", default, skip_serializing_if = "Option::is_none")]
    pub identity_token: Option<String>,

    #[serde(rename = "registrytoken", default, skip_serializing_if = "Option::is_none")]
    pub registry_token: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl AuthEntry {
    /// Convert to a credential record for `server`
    pub fn to_auth_config(&self, server: &str) -> Result<AuthConfig> {
        let mut record = AuthConfig {
            username: self.username.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
            auth: self.auth.clone().unwrap_or_default(),
            email: self.email.clone().unwrap_or_default(),
            server_address: server.to_string(),
            identity_token: self.identity_token.clone().unwrap_or_default(),
            registry_token: self.registry_token.clone().unwrap_or_default(),
        };

        // The `auth` field wins over plain fields, matching how it is written
        if !record.auth.is_empty() {
            record.username.clear();
            record.password.clear();
        }

        record.with_decoded_auth()
    }

    /// Build the on-disk entry for a record, keeping unknown fields of `previous`.
    fn from_auth_config(record: &AuthConfig, previous: Option<&AuthEntry>) -> Self {
        let auth = if record.username.is_empty() && record.password.is_empty() {
            None
        } else {
            Some(encode_auth(&record.username, &record.password))
        };

        Self {
            auth,
            username: None,
            password: None,
            email: non_empty(&record.email),
            identity_token: non_empty(&record.identity_token),
            registry_token: non_empty(&record.registry_token),
            extra: previous.map(|p| p.extra.clone()).unwrap_or_default(),
        }
    }
}

impl ConfigFile {
    /// Create an empty config bound to a path
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            ..Default::default()
        }
    }

    /// Load a config file. A missing file yields an empty config bound to `path`.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, starting empty");
            return Ok(Self::new(path));
        }

        let contents = fs::read_to_string(path).map_err(|e| CredentialError::io(path, e))?;
        let mut config = Self::parse(&contents).map_err(|e| {
            CredentialError::decode(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.filename = path.to_path_buf();
        Ok(config)
    }

    /// Load `config.json` from a config directory
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_path(&dir.join(CONFIG_FILE_NAME))
    }

    /// Parse config JSON that is not bound to a file
    pub fn parse(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(contents)?)
    }

    /// Path this config is saved to
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// All credential records, decoded and keyed by server
    pub fn auth_configs(&self) -> Result<BTreeMap<String, AuthConfig>> {
        self.auths
            .iter()
            .map(|(server, entry)| Ok((server.clone(), entry.to_auth_config(server)?)))
            .collect()
    }

    /// Find the key a server's credentials are stored under, accepting
    /// `https://host` style keys written by older clients.
    pub fn find_key(&self, server: &str) -> Option<String> {
        if self.auths.contains_key(server) {
            return Some(server.to_string());
        }
        let wanted = auth_config_key(server);
        self.auths
            .keys()
            .find(|key| auth_config_key(key) == wanted)
            .cloned()
    }

    /// Credential record for a server, if present
    pub fn auth_config(&self, server: &str) -> Result<Option<AuthConfig>> {
        match self.find_key(server) {
            Some(key) => {
                let mut record = self.auths[&key].to_auth_config(&key)?;
                record.server_address = auth_config_key(&key);
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Insert or replace the record under its normalized key.
    ///
    /// Returns `true` when the stored entry actually changed.
    pub fn set_auth_config(&mut self, record: &AuthConfig) -> bool {
        let key = auth_config_key(&record.server_address);
        let previous_key = self.find_key(&key);
        let previous = previous_key.as_ref().and_then(|k| self.auths.get(k));
        let entry = AuthEntry::from_auth_config(record, previous);

        if previous_key.as_deref() == Some(key.as_str()) && previous == Some(&entry) {
            return false;
        }

        if let Some(old) = previous_key.filter(|k| *k != key) {
            self.auths.remove(&old);
        }
        self.auths.insert(key, entry);
        true
    }

    /// Remove every entry matching the server. Returns `true` when something was removed.
    pub fn remove_auth_config(&mut self, server: &str) -> bool {
        let wanted = auth_config_key(server);
        let before = self.auths.len();
        self.auths
            .retain(|key, _| key != server && auth_config_key(key) != wanted);
        self.auths.len() != before
    }

    /// Write the config atomically (temp file in the same directory, then rename)
    pub fn save(&self) -> Result<()> {
        if self.filename.as_os_str().is_empty() {
            return Err(CredentialError::storage("config file has no path to save to"));
        }

        let dir = self
            .filename
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| CredentialError::io(dir, e))?;

        let json = serde_json::to_vec_pretty(self)?;
        let tmp_path = dir.join(format!(
            ".{}.tmp-{}",
            self.filename
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(CONFIG_FILE_NAME),
            std::process::id()
        ));

        {
            let mut tmp = open_private(&tmp_path).map_err(|e| CredentialError::io(&tmp_path, e))?;
            tmp.write_all(&json)
                .and_then(|_| tmp.sync_all())
                .map_err(|e| CredentialError::io(&tmp_path, e))?;
        }

        fs::rename(&tmp_path, &self.filename).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            CredentialError::io(&self.filename, e)
        })?;

        tracing::debug!(path = %self.filename.display(), "config file saved");
        Ok(())
    }

    /// Helper configured for a specific registry, if any
    pub fn helper_for(&self, server: &str) -> Option<&str> {
        let wanted = auth_config_key(server);
        self.cred_helpers
            .iter()
            .find(|(registry, _)| auth_config_key(registry) == wanted)
            .map(|(_, helper)| helper.as_str())
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
