//! Credential record types

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{CredentialError, Result};

/// Separator between the access and refresh token of an OAuth token pair
/// stored in a record's password.
pub const TOKEN_PAIR_SEPARATOR: &str = "..";

/// One credential record, keyed by its server address.
///
/// Field names on the wire match the engine's `AuthConfig` JSON so records
/// can be exchanged with the credential socket and `DOCKER_AUTH_CONFIG`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    /// Base64-encoded "username:password"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,

    #[serde(
        rename = "serveraddress",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub server_address: String,

    /// Registry-issued refresh token, stored instead of a password
    #[serde(
        rename = "identitytoken",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub identity_token: String,

    /// Bearer token sent to the registry as-is
    #[serde(
        rename = "registrytoken",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub registry_token: String,
}

impl AuthConfig {
    /// Create a username/password record for a server
    pub fn new(
        server_address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server_address: server_address.into(),
            username: username.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    /// Whether the record carries a secret (password or identity token)
    pub fn is_authenticated(&self) -> bool {
        !self.password.is_empty() || !self.identity_token.is_empty()
    }

    /// Whether the record carries no credential material at all
    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
            && self.password.is_empty()
            && self.auth.is_empty()
            && self.identity_token.is_empty()
            && self.registry_token.is_empty()
    }

    /// Fill `username`/`password` from the `auth` field when they are missing.
    pub fn with_decoded_auth(mut self) -> Result<Self> {
        if !self.auth.is_empty() && self.username.is_empty() && self.password.is_empty() {
            let (username, password) = decode_auth(&self.auth)?;
            self.username = username;
            self.password = password;
        }
        self.auth.clear();
        Ok(self)
    }

    /// Split the password into an OAuth `(access, refresh)` pair.
    ///
    /// Returns `None` for legacy opaque passwords that do not contain the
    /// reserved separator.
    pub fn token_pair(&self) -> Option<(&str, &str)> {
        self.password.split_once(TOKEN_PAIR_SEPARATOR)
    }

    /// Encode the record as the URL-safe base64 JSON used in `X-Registry-Auth`.
    pub fn encode_header(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::engine::general_purpose::URL_SAFE.encode(json))
    }

    /// Decode an `X-Registry-Auth` header value.
    pub fn decode_header(value: &str) -> Result<Self> {
        let raw = base64::engine::general_purpose::URL_SAFE
            .decode(value.trim())
            .map_err(|e| CredentialError::decode(format!("invalid registry auth header: {e}")))?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Join an access and refresh token into the stored password form.
pub fn join_token_pair(access: &str, refresh: &str) -> String {
    format!("{access}{TOKEN_PAIR_SEPARATOR}{refresh}")
}

/// Encode `username:password` for the config file `auth` field
pub fn encode_auth(username: &str, password: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"))
}

/// Decode a base64 `username:password` auth string
pub fn decode_auth(auth: &str) -> Result<(String, String)> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth.trim())
        .map_err(|e| CredentialError::decode(format!("invalid auth field: {e}")))?;

    let decoded = String::from_utf8(decoded)
        .map_err(|_| CredentialError::decode("auth field is not valid UTF-8"))?;

    match decoded.split_once(':') {
        Some((username, password)) => Ok((username.to_string(), password.to_string())),
        None => Err(CredentialError::decode(
            "invalid auth field: expected username:password",
        )),
    }
}
