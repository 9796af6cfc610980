//! Registry authorization handlers
//!
//! An [`Authorizer`] answers the challenges from a registry ping. Bearer
//! challenges go through the [`TokenHandler`]. The [`BasicHandler`] is used
//! when the registry only asks for Basic, or when the token exchange fails
//! for a reason other than rejected credentials.

use base64::{engine::general_purpose::STANDARD, Engine};
use parking_lot::Mutex;
use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use regcred_core::AuthConfig;

use crate::challenge::{AuthScheme, Challenge};
use crate::error::{RegistryError, Result};

/// Client id sent to token servers
pub const TOKEN_CLIENT_ID: &str = "regcred";

/// Token server response; registries disagree on the field name
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenResponse {
    fn into_parts(self, realm: &str) -> Result<(String, Option<String>)> {
        let token = self
            .token
            .filter(|t| !t.is_empty())
            .or(self.access_token.filter(|t| !t.is_empty()))
            .ok_or_else(|| RegistryError::TokenResponse {
                realm: realm.to_string(),
                reason: "no token in response".to_string(),
            })?;
        Ok((token, self.refresh_token.filter(|t| !t.is_empty())))
    }
}

/// Exchanges credentials for a bearer token at a challenge's realm
pub struct TokenHandler {
    client: reqwest::Client,
    registry: String,
    creds: AuthConfig,
    scopes: Vec<String>,
    offline_access: bool,
    force_oauth: bool,
    identity_token: Mutex<Option<String>>,
}

impl TokenHandler {
    pub fn new(client: reqwest::Client, registry: impl Into<String>, creds: AuthConfig) -> Self {
        Self {
            client,
            registry: registry.into(),
            creds,
            scopes: Vec::new(),
            offline_access: false,
            force_oauth: false,
            identity_token: Mutex::new(None),
        }
    }

    /// Request these scopes, e.g. `repository:team/app:pull,push`
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Ask the token server for a refresh token
    pub fn offline_access(mut self, offline: bool) -> Self {
        self.offline_access = offline;
        self
    }

    /// Use the OAuth2 password grant even without an identity token
    pub fn force_oauth(mut self, force: bool) -> Self {
        self.force_oauth = force;
        self
    }

    /// Refresh token handed out by the token server, if any
    pub fn identity_token(&self) -> Option<String> {
        self.identity_token.lock().clone()
    }

    fn scopes_for(&self, challenge: &Challenge) -> Vec<String> {
        let mut scopes = self.scopes.clone();
        if let Some(scope) = challenge.scope() {
            if !scopes.iter().any(|s| s == scope) {
                scopes.push(scope.to_string());
            }
        }
        scopes
    }

    /// Fetch a bearer token for a challenge
    pub async fn fetch_token(&self, challenge: &Challenge) -> Result<String> {
        let realm = challenge.realm().ok_or_else(|| RegistryError::TokenResponse {
            realm: self.registry.clone(),
            reason: "bearer challenge has no realm".to_string(),
        })?;
        let service = challenge.service().unwrap_or_default();
        let scopes = self.scopes_for(challenge);

        let response = if !self.creds.identity_token.is_empty() || self.force_oauth {
            self.post_token(realm, service, &scopes).await?
        } else {
            self.get_token(realm, service, &scopes).await?
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Unauthorized {
                registry: self.registry.clone(),
                reason: token_error_message(&body, status),
            });
        }
        if !status.is_success() {
            return Err(RegistryError::TokenResponse {
                realm: realm.to_string(),
                reason: format!("token request failed with {status}"),
            });
        }

        let body: TokenResponse = response.json().await.map_err(|e| RegistryError::TokenResponse {
            realm: realm.to_string(),
            reason: e.to_string(),
        })?;
        let (token, refresh) = body.into_parts(realm)?;

        if let Some(refresh) = refresh {
            debug!(registry = %self.registry, "token server issued an identity token");
            *self.identity_token.lock() = Some(refresh);
        }
        Ok(token)
    }

    /// `GET realm?service=..&scope=..` with basic credentials
    async fn get_token(
        &self,
        realm: &str,
        service: &str,
        scopes: &[String],
    ) -> Result<reqwest::Response> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if !service.is_empty() {
            query.push(("service", service));
        }
        for scope in scopes {
            query.push(("scope", scope.as_str()));
        }
        if self.offline_access {
            query.push(("offline_token", "true"));
            query.push(("client_id", TOKEN_CLIENT_ID));
        }

        let mut request = self.client.get(realm).query(&query);
        if !self.creds.username.is_empty() {
            request = request.basic_auth(&self.creds.username, Some(&self.creds.password));
        }
        request
            .send()
            .await
            .map_err(|e| RegistryError::from_reqwest(&self.registry, e))
    }

    /// `POST realm` with an OAuth2 refresh-token or password grant
    async fn post_token(
        &self,
        realm: &str,
        service: &str,
        scopes: &[String],
    ) -> Result<reqwest::Response> {
        let scope = scopes.join(" ");
        let mut form: Vec<(&str, &str)> = vec![("client_id", TOKEN_CLIENT_ID)];
        if !service.is_empty() {
            form.push(("service", service));
        }
        if !scope.is_empty() {
            form.push(("scope", scope.as_str()));
        }

        if !self.creds.identity_token.is_empty() {
            form.push(("grant_type", "refresh_token"));
            form.push(("refresh_token", self.creds.identity_token.as_str()));
        } else {
            form.push(("grant_type", "password"));
            form.push(("username", self.creds.username.as_str()));
            form.push(("password", self.creds.password.as_str()));
            if self.offline_access {
                form.push(("access_type", "offline"));
            }
        }

        self.client
            .post(realm)
            .form(&form)
            .send()
            .await
            .map_err(|e| RegistryError::from_reqwest(&self.registry, e))
    }
}

/// Error body returned by registries and token services
fn token_error_message(body: &str, status: StatusCode) -> String {
    #[derive(Deserialize)]
    struct Errors {
        #[serde(default)]
        errors: Vec<ErrorDetail>,
        #[serde(default)]
        details: Option<String>,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        #[serde(default)]
        message: String,
    }

    match serde_json::from_str::<Errors>(body) {
        Ok(errors) => errors
            .errors
            .into_iter()
            .map(|e| e.message)
            .find(|m| !m.is_empty())
            .or(errors.details)
            .unwrap_or_else(|| status.to_string()),
        Err(_) => status.to_string(),
    }
}

/// Plain `Authorization: Basic` credentials
#[derive(Debug, Clone)]
pub struct BasicHandler {
    header: Option<String>,
}

impl BasicHandler {
    pub fn new(creds: &AuthConfig) -> Self {
        let header = (!creds.username.is_empty()).then(|| {
            let raw = format!("{}:{}", creds.username, creds.password);
            format!("Basic {}", STANDARD.encode(raw))
        });
        Self { header }
    }

    pub fn has_credentials(&self) -> bool {
        self.header.is_some()
    }

    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.header {
            Some(header) => request.header(AUTHORIZATION, header),
            None => request,
        }
    }
}

/// Applies credentials to requests according to a registry's challenges
pub struct Authorizer {
    challenges: Vec<Challenge>,
    registry_token: Option<String>,
    token: TokenHandler,
    basic: BasicHandler,
    bearer: Mutex<Option<String>>,
}

impl Authorizer {
    pub fn new(challenges: Vec<Challenge>, creds: &AuthConfig, token: TokenHandler) -> Self {
        Self {
            challenges,
            registry_token: (!creds.registry_token.is_empty())
                .then(|| creds.registry_token.clone()),
            token,
            basic: BasicHandler::new(creds),
            bearer: Mutex::new(None),
        }
    }

    /// Identity token captured during a token exchange
    pub fn identity_token(&self) -> Option<String> {
        self.token.identity_token()
    }

    fn challenge(&self, scheme: &AuthScheme) -> Option<&Challenge> {
        self.challenges.iter().find(|c| &c.scheme == scheme)
    }

    /// Add credentials to a request
    pub async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        if let Some(token) = &self.registry_token {
            return Ok(request.bearer_auth(token));
        }

        if let Some(challenge) = self.challenge(&AuthScheme::Bearer) {
            let cached = self.bearer.lock().clone();
            if let Some(token) = cached {
                return Ok(request.bearer_auth(token));
            }

            match self.token.fetch_token(challenge).await {
                Ok(token) => {
                    *self.bearer.lock() = Some(token.clone());
                    return Ok(request.bearer_auth(token));
                }
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) if self.basic.has_credentials() => {
                    warn!(error = %e, "token exchange failed, falling back to basic auth");
                    return Ok(self.basic.apply(request));
                }
                Err(e) => return Err(e),
            }
        }

        if self.challenge(&AuthScheme::Basic).is_some() {
            return Ok(self.basic.apply(request));
        }

        Ok(request)
    }
}
