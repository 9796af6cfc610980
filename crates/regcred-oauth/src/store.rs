//! OAuth-backed credential store
//!
//! Wraps another store. Records for the canonical index server whose
//! password is an `access..refresh` pair are refreshed transparently before
//! they expire; every other key is passed through untouched.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use regcred_core::{
    auth_config_key, join_token_pair, AuthConfig, CredentialError, Result, INDEX_SERVER,
};
use regcred_store::{CredentialStore, SharedStore};

use crate::device::{device_login, Prompt, TerminalPrompt};
use crate::jwt::{parse_claims, Claims};
use crate::tenant::{TenantClient, TokenResponse};

/// Credential store that manages OAuth tokens for the index server
pub struct OAuthStore {
    backing: SharedStore,
    tenant: TenantClient,
    prompt: Arc<dyn Prompt>,
    interactive: bool,
    cancel: CancellationToken,
    /// Serializes refreshes and logins so one rotation happens at a time
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for OAuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthStore")
            .field("tenant", &self.tenant.config().tenant_url)
            .field("interactive", &self.interactive)
            .finish_non_exhaustive()
    }
}

/// A stored record split into its OAuth parts
struct StoredPair {
    access: String,
    refresh: String,
    claims: Option<Claims>,
}

impl StoredPair {
    fn parse(record: &AuthConfig) -> Option<Self> {
        let (access, refresh) = record.token_pair()?;
        Some(Self {
            access: access.to_string(),
            refresh: refresh.to_string(),
            claims: parse_claims(access).ok(),
        })
    }
}

impl OAuthStore {
    /// Wrap `backing` with token management against `tenant`
    pub fn new(backing: SharedStore, tenant: TenantClient) -> Self {
        Self {
            backing,
            tenant,
            prompt: Arc::new(TerminalPrompt),
            interactive: true,
            cancel: CancellationToken::new(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Use a different prompt for device logins
    pub fn with_prompt(mut self, prompt: Arc<dyn Prompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Allow or forbid falling back to a device login on `get`
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Cancellation token aborting device logins
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn tenant(&self) -> &TenantClient {
        &self.tenant
    }

    fn is_managed(server: &str) -> bool {
        auth_config_key(server) == INDEX_SERVER
    }

    /// What callers see for a valid pair: the bare access token and the
    /// identity from its claims.
    fn view(&self, access: &str, claims: &Claims) -> AuthConfig {
        let domain = claims.domain(&self.tenant.config().claims_namespace);
        AuthConfig {
            username: domain.username,
            password: access.to_string(),
            email: domain.email,
            server_address: INDEX_SERVER.to_string(),
            ..Default::default()
        }
    }

    /// The view of `pair` when its access token is still good for long enough
    fn fresh_view(&self, pair: &StoredPair) -> Option<AuthConfig> {
        let claims = pair.claims.as_ref()?;
        claims
            .outlives(self.tenant.config().min_lifetime())
            .then(|| self.view(&pair.access, claims))
    }

    /// Persist tokens and return the caller's view of them
    async fn save_tokens(&self, token: TokenResponse, previous_refresh: &str) -> Result<AuthConfig> {
        let claims = parse_claims(&token.access_token)?;
        let refresh = token
            .refresh_token
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| previous_refresh.to_string());

        let view = self.view(&token.access_token, &claims);
        let record = AuthConfig {
            password: join_token_pair(&token.access_token, &refresh),
            ..view.clone()
        };
        self.backing.store(record).await?;
        Ok(view)
    }

    /// Run the device authorization flow and store the resulting tokens
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when the cancellation token fires, `Timeout` when
    /// the device code expires, and the tenant's error otherwise.
    pub async fn login(&self) -> Result<AuthConfig> {
        let _guard = self.refresh_lock.lock().await;
        self.login_locked().await
    }

    async fn login_locked(&self) -> Result<AuthConfig> {
        let token = device_login(&self.tenant, self.prompt.as_ref(), &self.cancel).await?;
        let view = self.save_tokens(token, "").await?;
        info!(username = %view.username, "device login succeeded");
        Ok(view)
    }

    /// Refresh the stored pair, or log in again when that is impossible
    async fn renew(&self) -> Result<Option<AuthConfig>> {
        let _guard = self.refresh_lock.lock().await;

        // Another task may have rotated the tokens while we waited
        let Some(record) = self.backing.get(INDEX_SERVER).await? else {
            return Ok(None);
        };
        let Some(pair) = StoredPair::parse(&record) else {
            return Ok(Some(record));
        };
        if let Some(view) = self.fresh_view(&pair) {
            return Ok(Some(view));
        }

        let failure = if pair.refresh.is_empty() {
            CredentialError::TokenExpired {
                server: INDEX_SERVER.to_string(),
            }
        } else {
            match self.tenant.refresh(&pair.refresh).await {
                Ok(token) => return self.save_tokens(token, &pair.refresh).await.map(Some),
                Err(e) => {
                    warn!(error = %e, "token refresh failed");
                    CredentialError::RefreshFailed(e.to_string())
                }
            }
        };

        if !self.interactive {
            return Err(failure);
        }
        match self.login_locked().await {
            Ok(view) => Ok(Some(view)),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                debug!(error = %e, "device login after failed refresh also failed");
                Err(failure)
            }
        }
    }
}

#[async_trait]
impl CredentialStore for OAuthStore {
    async fn get(&self, server: &str) -> Result<Option<AuthConfig>> {
        if !Self::is_managed(server) {
            return self.backing.get(server).await;
        }

        let Some(record) = self.backing.get(server).await? else {
            return Ok(None);
        };
        let Some(pair) = StoredPair::parse(&record) else {
            // Legacy password or identity token
            return Ok(Some(record));
        };
        if let Some(view) = self.fresh_view(&pair) {
            return Ok(Some(view));
        }

        debug!("access token expires soon, renewing");
        self.renew().await
    }

    async fn get_all(&self) -> Result<BTreeMap<String, AuthConfig>> {
        let mut records = self.backing.get_all().await?;
        if let Some(record) = records.get_mut(INDEX_SERVER) {
            if let Some(pair) = StoredPair::parse(record) {
                if let Some(claims) = &pair.claims {
                    *record = self.view(&pair.access, claims);
                }
            }
        }
        Ok(records)
    }

    async fn store(&self, auth: AuthConfig) -> Result<()> {
        self.backing.store(auth).await
    }

    async fn erase(&self, server: &str) -> Result<()> {
        if Self::is_managed(server) {
            let stored = self.backing.get(server).await?;
            if let Some(pair) = stored.as_ref().and_then(StoredPair::parse) {
                if !pair.refresh.is_empty() {
                    match self.tenant.revoke(&pair.refresh).await {
                        Ok(()) => debug!("revoked refresh token"),
                        Err(e) => warn!(error = %e, "failed to revoke refresh token"),
                    }
                }
            }
        }
        self.backing.erase(server).await
    }
}
