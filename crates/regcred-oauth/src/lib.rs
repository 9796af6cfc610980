//! OAuth credentials for the canonical index server
//!
//! [`OAuthStore`] wraps any [`regcred_store::CredentialStore`]. It logs in
//! through the OAuth device authorization flow, keeps the
//! `access..refresh` token pair in the wrapped store, refreshes the access
//! token before it expires and revokes the refresh token on erase.

pub mod config;
pub mod device;
pub mod error;
pub mod jwt;
pub mod store;
pub mod tenant;

pub use config::OAuthConfig;
pub use device::{device_login, open_browser, Prompt, SilentPrompt, TerminalPrompt};
pub use error::{OAuthError, Result};
pub use jwt::{parse_claims, Audience, Claims, DomainClaims};
pub use store::OAuthStore;
pub use tenant::{DeviceCode, TenantClient, TokenResponse, DEVICE_CODE_GRANT};
