//! Store chain and registry client assembly shared by the commands

use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use regcred_core::{ConfigFile, CredentialError, Environment};
use regcred_oauth::{OAuthConfig, OAuthStore, SilentPrompt, TenantClient, TerminalPrompt};
use regcred_registry::{EndpointResolver, RegistryAuthClient, ServiceConfig, ServiceOptions};
use regcred_socket::{check_credential_server, SocketStore};
use regcred_store::{EnvStore, RoutingStore, SharedStore};

use crate::cli::Cli;

pub(crate) struct App {
    pub(crate) env: Environment,
    pub(crate) cancel: CancellationToken,
    oauth: OAuthConfig,
    service: ServiceOptions,
    credential_socket: bool,
}

impl App {
    pub(crate) fn new(cli: &Cli, mut env: Environment, cancel: CancellationToken) -> Self {
        if let Some(dir) = &cli.config {
            env.config_dir = Some(dir.clone());
        }

        let oauth = match &cli.oauth_tenant {
            Some(url) => OAuthConfig::with_tenant(url.clone()),
            None => OAuthConfig::default(),
        };

        let service = ServiceOptions {
            insecure_registries: cli.insecure_registries.clone(),
            registry_mirrors: cli.registry_mirrors.clone(),
            ..Default::default()
        };

        Self {
            env,
            cancel,
            oauth,
            service,
            credential_socket: cli.credential_socket,
        }
    }

    pub(crate) fn uses_credential_server(&self) -> bool {
        self.credential_socket
    }

    pub(crate) fn load_config(&self) -> Result<ConfigFile> {
        let dir = self.env.config_dir();
        ConfigFile::load_from_dir(&dir)
            .with_context(|| format!("Failed to load config from {}", dir.display()))
    }

    /// Helpers and config file routed per registry, under the env overlay
    pub(crate) fn local_store(&self, config: ConfigFile) -> SharedStore {
        let routing: SharedStore = Arc::new(RoutingStore::from_config(config, &self.env));
        EnvStore::wrap(&self.env, routing)
    }

    /// Wrap `backing` with OAuth token management for the canonical index
    pub(crate) fn oauth_store(&self, backing: SharedStore, interactive: bool) -> Result<OAuthStore> {
        let tenant = TenantClient::new(self.oauth.clone())
            .map_err(CredentialError::from)
            .context("Failed to create OAuth tenant client")?;

        let store = OAuthStore::new(backing, tenant)
            .interactive(interactive)
            .with_cancellation(self.cancel.clone());
        Ok(if interactive {
            store.with_prompt(Arc::new(TerminalPrompt))
        } else {
            store.with_prompt(Arc::new(SilentPrompt))
        })
    }

    /// Records as stored, without token refresh: the credential server when
    /// requested, the local chain otherwise
    pub(crate) async fn backend(&self) -> Result<SharedStore> {
        if self.credential_socket {
            let path = self.env.credential_socket_path();
            if !check_credential_server(&path).await {
                return Err(CredentialError::storage(format!(
                    "no credential server listening on {}",
                    path.display()
                ))
                .into());
            }
            debug!(socket = %path.display(), "using credential server");
            return Ok(Arc::new(SocketStore::new(path)));
        }

        Ok(self.local_store(self.load_config()?))
    }

    /// The store commands read and write through
    ///
    /// Over the socket, token refresh happens inside the server.
    pub(crate) async fn store(&self) -> Result<SharedStore> {
        let backend = self.backend().await?;
        if self.credential_socket {
            return Ok(backend);
        }
        let interactive = std::io::stdin().is_terminal();
        Ok(Arc::new(self.oauth_store(backend, interactive)?))
    }

    /// Tell the user that `DOCKER_AUTH_CONFIG` shadows stored credentials
    pub(crate) fn warn_env_credentials(&self) {
        if self.env.has_env_credentials() {
            eprintln!("{}", EnvStore::warning());
        }
    }

    pub(crate) fn registry_client(&self, config: &ConfigFile) -> Result<RegistryAuthClient> {
        let service = ServiceConfig::new(&self.service)
            .map_err(CredentialError::from)
            .context("Invalid registry configuration")?;
        let endpoints = EndpointResolver::new(service, self.env.certs_dir());

        let client = RegistryAuthClient::new(endpoints);
        Ok(match user_agent_override(config) {
            Some(agent) => client.with_user_agent(agent),
            None => client,
        })
    }
}

/// `User-Agent` from the config file's `HttpHeaders`, if any
fn user_agent_override(config: &ConfigFile) -> Option<String> {
    config
        .http_headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
        .map(|(_, value)| value.clone())
        .filter(|value| !value.is_empty())
}
