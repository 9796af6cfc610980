//! OAuth tenant HTTP client
//!
//! Form-encoded calls for the device authorization grant (RFC 8628), the
//! refresh grant and token revocation.

use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use regcred_core::user_agent;

use crate::config::OAuthConfig;
use crate::error::{OAuthError, Result};

/// Grant type of the device authorization poll
pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Default poll interval when the tenant suggests none (seconds)
fn default_interval() -> u64 {
    5
}

/// State returned by `/oauth/device/code`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    /// Poll interval (seconds)
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Seconds until the device code expires
    pub expires_in: u64,
}

impl DeviceCode {
    /// URL to open in the browser, prefilled with the user code when available
    pub fn browser_url(&self) -> &str {
        self.verification_uri_complete
            .as_deref()
            .unwrap_or(&self.verification_uri)
    }
}

/// Body of `/oauth/token` responses, successful or not
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

/// Client for one OAuth tenant
#[derive(Debug, Clone)]
pub struct TenantClient {
    client: Client,
    config: OAuthConfig,
}

impl TenantClient {
    /// Create a client for the configured tenant
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: OAuthConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url(), path)
    }

    /// Start a device login
    #[instrument(skip(self))]
    pub async fn device_code(&self) -> Result<DeviceCode> {
        let response = self
            .client
            .post(self.url("/oauth/device/code"))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("audience", self.config.audience.as_str()),
                ("scope", self.config.scope.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(tenant_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| OAuthError::Decode(format!("device code response: {e}")))
    }

    /// Poll once for the device login result.
    ///
    /// Returns [`OAuthError::AuthorizationPending`] or [`OAuthError::SlowDown`]
    /// while the user has not finished; both are retryable.
    pub async fn poll_device_token(&self, device_code: &str) -> Result<TokenResponse> {
        let response = self
            .client
            .post(self.url("/oauth/token"))
            .form(&[
                ("grant_type", DEVICE_CODE_GRANT),
                ("client_id", self.config.client_id.as_str()),
                ("device_code", device_code),
            ])
            .send()
            .await?;

        token_result(response).await
    }

    /// Exchange a refresh token for a new access token
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = self
            .client
            .post(self.url("/oauth/token"))
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.config.client_id.as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let token = token_result(response).await?;
        debug!(rotated = token.refresh_token.is_some(), "refreshed access token");
        Ok(token)
    }

    /// Revoke a refresh token
    #[instrument(skip_all)]
    pub async fn revoke(&self, refresh_token: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("/oauth/revoke"))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("token", refresh_token),
            ])
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(tenant_error(response).await)
        }
    }

    /// Browser URL ending the tenant's web session
    pub fn logout_url(&self) -> String {
        format!(
            "{}/v2/logout?client_id={}",
            self.config.base_url(),
            self.config.client_id
        )
    }
}

async fn token_result(response: Response) -> Result<TokenResponse> {
    let status = response.status();
    let body = response.text().await?;
    let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
        OAuthError::Decode(format!("token response ({}): {e}", status.as_u16()))
    })?;

    match token.error.as_deref() {
        Some("authorization_pending") => Err(OAuthError::AuthorizationPending),
        Some("slow_down") => Err(OAuthError::SlowDown),
        Some("expired_token") => Err(OAuthError::Expired),
        Some(error) => Err(OAuthError::Tenant {
            status: status.as_u16(),
            error: error.to_string(),
            description: token.error_description.clone().unwrap_or_default(),
        }),
        None if !status.is_success() || token.access_token.is_empty() => Err(OAuthError::Tenant {
            status: status.as_u16(),
            error: "invalid_response".to_string(),
            description: "token response carried no access token".to_string(),
        }),
        None => Ok(token),
    }
}

async fn tenant_error(response: Response) -> OAuthError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let parsed: Option<TokenResponse> = serde_json::from_str(&body).ok();

    match parsed.and_then(|t| t.error.map(|e| (e, t.error_description))) {
        Some((error, description)) => OAuthError::Tenant {
            status,
            error,
            description: description.unwrap_or_default(),
        },
        None => OAuthError::Tenant {
            status,
            error: "http_error".to_string(),
            description: body,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logout_url() {
        let client = TenantClient::new(OAuthConfig::with_tenant("https://login.test/")).unwrap();
        assert_eq!(
            client.logout_url(),
            format!(
                "https://login.test/v2/logout?client_id={}",
                OAuthConfig::default().client_id
            )
        );
    }

    #[test]
    fn test_device_code_defaults() {
        let code: DeviceCode = serde_json::from_str(
            r#"{"device_code":"d","user_code":"ABCD-EFGH","verification_uri":"https://login.test/activate","expires_in":900}"#,
        )
        .unwrap();
        assert_eq!(code.interval, 5);
        assert_eq!(code.browser_url(), "https://login.test/activate");
    }
}
