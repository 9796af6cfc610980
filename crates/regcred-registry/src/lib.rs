//! Registry endpoints and v2 authentication
//!
//! - [`ServiceConfig`]: validated insecure-registry and mirror settings
//! - [`EndpointResolver`]: ordered endpoints for a registry, with TLS from
//!   the certificates directory
//! - [`RegistryAuthClient`]: login probe and per-repository authorization

pub mod auth;
pub mod challenge;
pub mod client;
pub mod endpoints;
pub mod error;
pub mod service_config;
pub mod tls;

pub use auth::{Authorizer, BasicHandler, TokenHandler, TOKEN_CLIENT_ID};
pub use challenge::{parse_challenges, AuthScheme, Challenge};
pub use client::{
    LoginResult, RegistryAuthClient, RegistrySession, DEFAULT_REQUEST_TIMEOUT, LOGIN_SUCCEEDED,
};
pub use endpoints::{ApiEndpoint, EndpointResolver};
pub use error::{RegistryError, Result};
pub use service_config::{
    HostResolver, IndexInfo, ServiceConfig, ServiceOptions, StaticResolver, SystemResolver,
};
pub use tls::{load_cert_dir, TlsConfig};
