//! Credential store trait
//!
//! Every layer of the credential chain (config file, native helper,
//! in-memory overlay, OAuth wrapper, credential socket) implements
//! [`CredentialStore`]. Layers compose by holding an
//! [`Arc<dyn CredentialStore>`](SharedStore) of the layer below.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use regcred_core::{AuthConfig, Result};

/// Read-write access to registry credentials keyed by server address.
///
/// # Contract
///
/// - `get` returns `Ok(None)` when nothing is stored for the server.
/// - `store` is an upsert keyed by `AuthConfig::server_address`, and does no
///   backing write when the stored record already equals the new one.
/// - `erase` succeeds when nothing is stored.
///
/// Implementations must be safe to call from concurrent tasks.
///
/// # Example
///
/// ```rust,ignore
/// use regcred_store::CredentialStore;
///
/// async fn username(store: &dyn CredentialStore) -> regcred_core::Result<Option<String>> {
///     Ok(store.get("ghcr.io").await?.map(|auth| auth.username))
/// }
/// ```
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Retrieve the credentials stored for a server.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` when the backend cannot be reached and
    /// `Decode` when what it returned is malformed.
    async fn get(&self, server: &str) -> Result<Option<AuthConfig>>;

    /// Retrieve every stored credential, keyed by server.
    async fn get_all(&self) -> Result<BTreeMap<String, AuthConfig>>;

    /// Store or replace the credentials for `auth.server_address`.
    async fn store(&self, auth: AuthConfig) -> Result<()>;

    /// Remove the credentials for a server.
    async fn erase(&self, server: &str) -> Result<()>;
}

/// Shared, dynamically dispatched credential store
pub type SharedStore = Arc<dyn CredentialStore>;

impl std::fmt::Debug for dyn CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn CredentialStore")
    }
}

#[async_trait]
impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
    async fn get(&self, server: &str) -> Result<Option<AuthConfig>> {
        (**self).get(server).await
    }

    async fn get_all(&self) -> Result<BTreeMap<String, AuthConfig>> {
        (**self).get_all().await
    }

    async fn store(&self, auth: AuthConfig) -> Result<()> {
        (**self).store(auth).await
    }

    async fn erase(&self, server: &str) -> Result<()> {
        (**self).erase(server).await
    }
}
