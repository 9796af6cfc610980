//! Registry login probe and per-repository authorization

use reqwest::{Method, RequestBuilder, StatusCode};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use regcred_core::{
    convert_to_hostname, is_index_server, registry_from_reference, repository_from_reference,
    user_agent, AuthConfig, DEFAULT_REGISTRY,
};

use crate::auth::{Authorizer, TokenHandler};
use crate::challenge::parse_challenges;
use crate::endpoints::{ApiEndpoint, EndpointResolver};
use crate::error::{RegistryError, Result};

/// Per-request deadline for registry and token server calls
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Status line reported after a successful login
pub const LOGIN_SUCCEEDED: &str = "Login Succeeded";

/// Outcome of [`RegistryAuthClient::login`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResult {
    pub status: String,
    /// Refresh token issued by the registry, to be stored instead of the password
    pub identity_token: Option<String>,
}

/// Authenticated access to one repository on one endpoint
pub struct RegistrySession {
    endpoint: ApiEndpoint,
    client: reqwest::Client,
    authorizer: Authorizer,
    registry: String,
}

impl std::fmt::Debug for RegistrySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrySession")
            .field("endpoint", &self.endpoint.url)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl RegistrySession {
    pub fn endpoint(&self) -> &ApiEndpoint {
        &self.endpoint
    }

    /// Build an authorized request for `<endpoint>/v2/<path>`
    pub async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.endpoint.v2_url(path)?;
        self.authorizer
            .authorize(self.client.request(method, url))
            .await
    }
}

/// v2 registry authentication client
#[derive(Debug)]
pub struct RegistryAuthClient {
    endpoints: EndpointResolver,
    user_agent: String,
    timeout: Duration,
}

impl RegistryAuthClient {
    pub fn new(endpoints: EndpointResolver) -> Self {
        Self {
            endpoints,
            user_agent: user_agent(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the User-Agent, e.g. from the config file's `HttpHeaders`
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check credentials against a registry.
    ///
    /// Endpoints are tried in order. An `Unauthorized` answer or
    /// cancellation stops the loop; any other failure moves on to the next
    /// endpoint and the last one is returned if none succeeds.
    pub async fn login(&self, auth: &AuthConfig, cancel: &CancellationToken) -> Result<LoginResult> {
        let registry = login_hostname(&auth.server_address);
        let endpoints = self.endpoints.lookup_push_endpoints(&registry).await?;

        let mut last_error = None;
        for endpoint in endpoints {
            if cancel.is_cancelled() {
                return Err(RegistryError::Cancelled(registry));
            }

            debug!(registry = %registry, endpoint = %endpoint.url, "attempting login");
            match self.login_endpoint(&registry, &endpoint, auth, cancel).await {
                Ok(identity_token) => {
                    info!(registry = %registry, endpoint = %endpoint.url, "login succeeded");
                    return Ok(LoginResult {
                        status: LOGIN_SUCCEEDED.to_string(),
                        identity_token,
                    });
                }
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    warn!(registry = %registry, endpoint = %endpoint.url, error = %e, "login attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(RegistryError::NoEndpoints(registry)))
    }

    async fn login_endpoint(
        &self,
        registry: &str,
        endpoint: &ApiEndpoint,
        auth: &AuthConfig,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let client = endpoint.tls.build_client(&self.user_agent, self.timeout)?;
        let ping_url = endpoint.v2_url("")?;

        let ping = cancellable(cancel, registry, client.get(ping_url.clone()).send()).await?;
        match ping.status() {
            StatusCode::OK => return Ok(None),
            StatusCode::UNAUTHORIZED => {}
            status => {
                return Err(RegistryError::UnexpectedStatus {
                    registry: registry.to_string(),
                    status: status.as_u16(),
                })
            }
        }

        let token = TokenHandler::new(client.clone(), registry, auth.clone()).offline_access(true);
        let authorizer = Authorizer::new(parse_challenges(ping.headers()), auth, token);

        let request = tokio::select! {
            _ = cancel.cancelled() => return Err(RegistryError::Cancelled(registry.to_string())),
            request = authorizer.authorize(client.get(ping_url)) => request?,
        };
        let response = cancellable(cancel, registry, request.send()).await?;

        match response.status() {
            StatusCode::OK => Ok(authorizer.identity_token()),
            StatusCode::UNAUTHORIZED => Err(RegistryError::Unauthorized {
                registry: registry.to_string(),
                reason: "incorrect username or password".to_string(),
            }),
            status => Err(RegistryError::UnexpectedStatus {
                registry: registry.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    /// Authorize access to a repository for `actions` (`pull`, `push`).
    ///
    /// `reference` is an image reference such as `r.test/team/app:tag`.
    /// Mirrors are only considered when `actions` is exactly `pull`.
    pub async fn authorize_repository(
        &self,
        auth: &AuthConfig,
        reference: &str,
        actions: &[&str],
        cancel: &CancellationToken,
    ) -> Result<RegistrySession> {
        let registry = registry_from_reference(reference);
        let repository = repository_from_reference(reference);
        let scope = format!("repository:{repository}:{}", actions.join(","));

        let endpoints = if actions == ["pull"] {
            self.endpoints.lookup_pull_endpoints(&registry).await?
        } else {
            self.endpoints.lookup_push_endpoints(&registry).await?
        };

        let mut last_error = None;
        for endpoint in endpoints {
            if cancel.is_cancelled() {
                return Err(RegistryError::Cancelled(registry));
            }

            let client = endpoint.tls.build_client(&self.user_agent, self.timeout)?;
            let ping = match cancellable(cancel, &registry, client.get(endpoint.v2_url("")?).send()).await {
                Ok(ping) => ping,
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    debug!(registry = %registry, endpoint = %endpoint.url, error = %e, "endpoint unreachable");
                    last_error = Some(e);
                    continue;
                }
            };

            let token = TokenHandler::new(client.clone(), &registry, auth.clone())
                .with_scopes(vec![scope.clone()]);
            let authorizer = Authorizer::new(parse_challenges(ping.headers()), auth, token);

            return Ok(RegistrySession {
                endpoint,
                client,
                authorizer,
                registry,
            });
        }

        Err(last_error.unwrap_or(RegistryError::NoEndpoints(registry)))
    }
}

/// Hostname to log in to; the canonical index maps to its short name
fn login_hostname(server_address: &str) -> String {
    if server_address.trim().is_empty() || is_index_server(server_address) {
        DEFAULT_REGISTRY.to_string()
    } else {
        convert_to_hostname(server_address)
    }
}

async fn cancellable<F>(cancel: &CancellationToken, registry: &str, send: F) -> Result<reqwest::Response>
where
    F: Future<Output = reqwest::Result<reqwest::Response>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(RegistryError::Cancelled(registry.to_string())),
        result = send => result.map_err(|e| RegistryError::from_reqwest(registry, e)),
    }
}
