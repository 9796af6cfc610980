//! JWT claim parsing
//!
//! Access tokens are parsed without verifying their signature: the tenant is
//! trusted over TLS and the CLI only needs the expiry and identity claims.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{OAuthError, Result};

/// `aud` may be a single string or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Default for Audience {
    fn default() -> Self {
        Audience::Many(Vec::new())
    }
}

/// Registered claims plus everything else the token carries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Expiration time (Unix timestamp)
    #[serde(default)]
    pub exp: u64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: u64,
    #[serde(default)]
    pub iss: String,
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub aud: Audience,
    /// Non-registered claims, including the namespaced domain claims
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Identity claims stored under the tenant's namespace key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainClaims {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub source: Value,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

impl Claims {
    /// Domain claims under `namespace`, empty when absent
    pub fn domain(&self, namespace: &str) -> DomainClaims {
        self.extra
            .get(namespace)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Time left before expiry; zero once expired
    pub fn remaining_lifetime(&self) -> Duration {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Duration::from_secs(self.exp.saturating_sub(now))
    }

    /// Whether the token stays valid for longer than `min_lifetime`
    pub fn outlives(&self, min_lifetime: Duration) -> bool {
        self.remaining_lifetime() > min_lifetime
    }
}

/// Decode a JWT's claims without verifying its signature or expiry
pub fn parse_claims(token: &str) -> Result<Claims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| OAuthError::Jwt(e.to_string()))
}
