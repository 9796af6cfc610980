//! Store selection
//!
//! Picks the store each registry's credentials live in: a per-registry
//! helper from `credHelpers`, the `credsStore` helper, a detected platform
//! helper, or the config file itself.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use regcred_core::{auth_config_key, AuthConfig, ConfigFile, Environment, Result};

use crate::file::FileStore;
use crate::helper::{Program, ShellProgram, HELPER_PREFIX};
use crate::native::NativeStore;
use crate::store::{CredentialStore, SharedStore};

/// Linux helper preferred when it is fully installed
pub const PREFERRED_HELPER_LINUX: &str = "pass";

/// Binary the preferred Linux helper depends on
pub const PREFERRED_HELPER_DEPENDENCY: &str = "pass";

/// Platform default helper
#[cfg(target_os = "macos")]
pub const DEFAULT_HELPER: &str = "osxkeychain";
#[cfg(target_os = "windows")]
pub const DEFAULT_HELPER: &str = "wincred";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub const DEFAULT_HELPER: &str = "secretservice";

/// Detect the helper to use when the config names none.
///
/// On Linux `pass` wins only when both its helper and `pass` itself are on
/// `PATH`; a partial install falls back to the platform default. Returns
/// `None` when no helper binary is installed.
pub fn detect_default_helper(env: &Environment) -> Option<String> {
    let installed = |name: &str| env.find_executable(&format!("{HELPER_PREFIX}{name}")).is_some();

    if cfg!(target_os = "linux")
        && installed(PREFERRED_HELPER_LINUX)
        && env.find_executable(PREFERRED_HELPER_DEPENDENCY).is_some()
    {
        return Some(PREFERRED_HELPER_LINUX.to_string());
    }

    installed(DEFAULT_HELPER).then(|| DEFAULT_HELPER.to_string())
}

/// Creates the helper program for a helper name
pub type ProgramFactory = dyn Fn(&str) -> Arc<dyn Program> + Send + Sync;

/// Routes each registry to the store its credentials live in
pub struct RoutingStore {
    default: SharedStore,
    helpers: BTreeMap<String, SharedStore>,
}

impl std::fmt::Debug for RoutingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingStore")
            .field("helpers", &self.helpers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl RoutingStore {
    /// Build the routing for a loaded config, running real helper binaries
    pub fn from_config(config: ConfigFile, env: &Environment) -> Self {
        let env_for_programs = env.clone();
        let factory = move |name: &str| -> Arc<dyn Program> {
            Arc::new(ShellProgram::new(name, &env_for_programs))
        };
        let default_helper = config
            .creds_store
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| detect_default_helper(env));
        Self::with_factory(config, default_helper, &factory)
    }

    /// Build the routing with a custom helper factory
    pub fn with_factory(
        config: ConfigFile,
        default_helper: Option<String>,
        factory: &ProgramFactory,
    ) -> Self {
        let cred_helpers = config.cred_helpers.clone();
        let file: SharedStore = Arc::new(FileStore::new(config));

        let default: SharedStore = match default_helper {
            Some(name) => {
                info!(helper = %name, "using credential helper");
                Arc::new(NativeStore::new(factory(&name), file.clone()))
            }
            None => {
                debug!("no credential helper configured, using config file");
                file.clone()
            }
        };

        let helpers = cred_helpers
            .into_iter()
            .filter(|(_, name)| !name.is_empty())
            .map(|(registry, name)| {
                let store: SharedStore = Arc::new(NativeStore::new(factory(&name), file.clone()));
                (auth_config_key(&registry), store)
            })
            .collect();

        Self { default, helpers }
    }

    fn route(&self, server: &str) -> &SharedStore {
        self.helpers
            .get(&auth_config_key(server))
            .unwrap_or(&self.default)
    }
}

#[async_trait]
impl CredentialStore for RoutingStore {
    async fn get(&self, server: &str) -> Result<Option<AuthConfig>> {
        self.route(server).get(server).await
    }

    async fn get_all(&self) -> Result<BTreeMap<String, AuthConfig>> {
        let mut records = self.default.get_all().await?;
        for (registry, store) in &self.helpers {
            if let Some(record) = store.get(registry).await? {
                records.insert(registry.clone(), record);
            }
        }
        Ok(records)
    }

    async fn store(&self, auth: AuthConfig) -> Result<()> {
        let server = auth.server_address.clone();
        self.route(&server).store(auth).await
    }

    async fn erase(&self, server: &str) -> Result<()> {
        self.route(server).erase(server).await
    }
}
