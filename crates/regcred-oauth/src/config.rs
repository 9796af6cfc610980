//! OAuth tenant configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the OAuth tenant that issues index credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthConfig {
    /// Base URL of the tenant
    #[serde(default = "default_tenant_url")]
    pub tenant_url: String,

    /// OAuth client id of the CLI
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Audience requested for access tokens
    #[serde(default = "default_audience")]
    pub audience: String,

    /// Scopes requested during device login
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Claim key holding the domain claims (username, email...)
    #[serde(default = "default_claims_namespace")]
    pub claims_namespace: String,

    /// Access tokens expiring sooner than this are refreshed (seconds)
    #[serde(default = "default_min_lifetime_secs")]
    pub min_lifetime_secs: u64,

    /// Per-request timeout for tenant calls (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_tenant_url() -> String {
    "https://login.docker.com".to_string()
}

fn default_client_id() -> String {
    "L4v0dmlNBpYUjGGab0C2JtgTgXr1Qz4d".to_string()
}

fn default_audience() -> String {
    "https://hub.docker.com".to_string()
}

fn default_scope() -> String {
    "openid offline_access".to_string()
}

fn default_claims_namespace() -> String {
    "https://hub.docker.com".to_string()
}

fn default_min_lifetime_secs() -> u64 {
    50 * 60
}

fn default_request_timeout_secs() -> u64 {
    15
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            tenant_url: default_tenant_url(),
            client_id: default_client_id(),
            audience: default_audience(),
            scope: default_scope(),
            claims_namespace: default_claims_namespace(),
            min_lifetime_secs: default_min_lifetime_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl OAuthConfig {
    /// Config pointing at another tenant, keeping the other defaults
    pub fn with_tenant(tenant_url: impl Into<String>) -> Self {
        Self {
            tenant_url: tenant_url.into(),
            ..Default::default()
        }
    }

    pub fn min_lifetime(&self) -> Duration {
        Duration::from_secs(self.min_lifetime_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Tenant URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.tenant_url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: OAuthConfig =
            serde_json::from_str(r#"{"tenant_url": "http://127.0.0.1:9999/"}"#).unwrap();
        assert_eq!(config.base_url(), "http://127.0.0.1:9999");
        assert_eq!(config.min_lifetime(), Duration::from_secs(3000));
        assert_eq!(config.client_id, OAuthConfig::default().client_id);
    }
}
