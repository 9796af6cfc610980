//! Registry endpoint resolution
//!
//! Turns a registry hostname into the ordered list of base URLs to try.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use regcred_core::{is_index_server, DEFAULT_V2_REGISTRY};

use crate::error::{RegistryError, Result};
use crate::service_config::{HostResolver, ServiceConfig, SystemResolver};
use crate::tls::{load_cert_dir, TlsConfig};

/// One base URL to try
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoint {
    pub url: reqwest::Url,
    pub mirror: bool,
    pub official: bool,
    pub tls: TlsConfig,
}

impl ApiEndpoint {
    pub fn is_plain_http(&self) -> bool {
        self.url.scheme() == "http"
    }

    /// `<endpoint>/v2/...`
    pub fn v2_url(&self, path: &str) -> Result<reqwest::Url> {
        let path = format!("/v2/{}", path.trim_start_matches('/'));
        self.url
            .join(&path)
            .map_err(|e| RegistryError::NoEndpoints(format!("{}: {e}", self.url)))
    }
}

/// Computes endpoints from a [`ServiceConfig`] and a certificates directory
pub struct EndpointResolver {
    config: ServiceConfig,
    certs_dir: PathBuf,
    resolver: Arc<dyn HostResolver>,
}

impl std::fmt::Debug for EndpointResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointResolver")
            .field("config", &self.config)
            .field("certs_dir", &self.certs_dir)
            .finish_non_exhaustive()
    }
}

impl EndpointResolver {
    pub fn new(config: ServiceConfig, certs_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            certs_dir: certs_dir.into(),
            resolver: Arc::new(SystemResolver),
        }
    }

    /// Use a custom resolver for CIDR classification
    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Endpoints for pulling: mirrors first for the canonical registry
    pub async fn lookup_pull_endpoints(&self, hostname: &str) -> Result<Vec<ApiEndpoint>> {
        self.lookup(hostname, true).await
    }

    /// Endpoints for pushing and logging in; never includes mirrors
    pub async fn lookup_push_endpoints(&self, hostname: &str) -> Result<Vec<ApiEndpoint>> {
        self.lookup(hostname, false).await
    }

    async fn lookup(&self, hostname: &str, include_mirrors: bool) -> Result<Vec<ApiEndpoint>> {
        let mut endpoints = Vec::new();

        if is_index_server(hostname) {
            if include_mirrors {
                for mirror in self.config.mirrors() {
                    let url = parse_url(mirror)?;
                    let tls = match url.host_str() {
                        Some(host) => load_cert_dir(&self.certs_dir.join(host_with_port(&url, host)))?,
                        None => TlsConfig::default(),
                    };
                    endpoints.push(ApiEndpoint {
                        url,
                        mirror: true,
                        official: true,
                        tls,
                    });
                }
            }
            endpoints.push(ApiEndpoint {
                url: parse_url(&format!("https://{DEFAULT_V2_REGISTRY}"))?,
                mirror: false,
                official: true,
                tls: TlsConfig::default(),
            });
            return Ok(endpoints);
        }

        let mut tls = load_cert_dir(&self.certs_dir.join(hostname))?;
        let info = self.config.index_info(hostname, self.resolver.as_ref()).await;
        tls.insecure_skip_verify = !info.secure;
        debug!(registry = %hostname, secure = info.secure, "resolved registry endpoints");

        endpoints.push(ApiEndpoint {
            url: parse_url(&format!("https://{hostname}"))?,
            mirror: false,
            official: false,
            tls: tls.clone(),
        });

        if !info.secure {
            endpoints.push(ApiEndpoint {
                url: parse_url(&format!("http://{hostname}"))?,
                mirror: false,
                official: false,
                // Carried to mark the insecure fallback as intended
                tls,
            });
        }

        Ok(endpoints)
    }
}

fn parse_url(raw: &str) -> Result<reqwest::Url> {
    reqwest::Url::parse(raw).map_err(|e| RegistryError::NoEndpoints(format!("{raw}: {e}")))
}

fn host_with_port(url: &reqwest::Url, host: &str) -> String {
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
