//! Insecure-registry and mirror configuration
//!
//! [`ServiceOptions`] is the raw user input (daemon-style
//! `insecure-registries` / `registry-mirrors` lists). [`ServiceConfig::new`]
//! validates it once; afterwards registries are classified secure or
//! insecure with [`ServiceConfig::is_secure_index`].

use async_trait::async_trait;
use ipnet::IpNet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::OnceLock;
use tracing::{debug, warn};

use regcred_core::{is_index_server, DEFAULT_REGISTRY};

use crate::error::{RegistryError, Result};

/// `host[:port]`, where host is a DNS name or a bracketed IPv6 literal
const HOST_PORT_PATTERN: &str = r"^(?:(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])(?:\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))*|\[[a-fA-F0-9:]+\])(?::[0-9]+)?$";

static HOST_PORT: OnceLock<Regex> = OnceLock::new();

fn host_port_regex() -> &'static Regex {
    HOST_PORT.get_or_init(|| Regex::new(HOST_PORT_PATTERN).expect("host:port pattern is valid"))
}

/// Raw registry options as written by the user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceOptions {
    /// CIDRs or `host[:port]` entries reachable without verified TLS
    #[serde(default)]
    pub insecure_registries: Vec<String>,

    /// `host[:port]` entries always treated as secure
    #[serde(default)]
    pub secure_registries: Vec<String>,

    /// Pull-through mirrors of the canonical registry
    #[serde(default)]
    pub registry_mirrors: Vec<String>,
}

/// What is known about one registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub mirrors: Vec<String>,
    pub secure: bool,
    pub official: bool,
}

/// Resolves hostnames for CIDR matching
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the system's DNS configuration
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Fixed host table, for hosts files and tests
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    hosts: BTreeMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>, addrs: Vec<IpAddr>) -> Self {
        self.hosts.insert(host.into(), addrs);
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        self.hosts.get(host).cloned().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("no such host: {host}"))
        })
    }
}

/// Validated registry configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    insecure_cidrs: Vec<IpNet>,
    index_configs: BTreeMap<String, IndexInfo>,
    mirrors: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        // Empty options always validate
        Self::build(&ServiceOptions::default()).unwrap_or_else(|_| Self {
            insecure_cidrs: loopback_cidrs(),
            index_configs: BTreeMap::new(),
            mirrors: Vec::new(),
        })
    }
}

impl ServiceConfig {
    /// Validate raw options.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] for a scheme other than
    /// `http`/`https`, a malformed CIDR or host, an out-of-range port, or an
    /// invalid mirror URL.
    pub fn new(options: &ServiceOptions) -> Result<Self> {
        Self::build(options)
    }

    fn build(options: &ServiceOptions) -> Result<Self> {
        let mirrors = options
            .registry_mirrors
            .iter()
            .map(|m| validate_mirror(m))
            .collect::<Result<Vec<_>>>()?;

        let mut insecure_cidrs = loopback_cidrs();
        let mut index_configs = BTreeMap::new();

        for raw in &options.insecure_registries {
            let entry = strip_scheme(raw)?;

            if entry.contains('/') {
                let net: IpNet = entry.parse().map_err(|e| {
                    RegistryError::InvalidConfig(format!("invalid CIDR {entry:?}: {e}"))
                })?;
                let net = net.trunc();
                if !insecure_cidrs.contains(&net) {
                    insecure_cidrs.push(net);
                }
                continue;
            }

            validate_host_port(entry)?;
            index_configs.insert(
                entry.to_string(),
                IndexInfo {
                    name: entry.to_string(),
                    mirrors: Vec::new(),
                    secure: false,
                    official: false,
                },
            );
        }

        for raw in &options.secure_registries {
            let entry = strip_scheme(raw)?;
            validate_host_port(entry)?;
            index_configs.insert(
                entry.to_string(),
                IndexInfo {
                    name: entry.to_string(),
                    mirrors: Vec::new(),
                    secure: true,
                    official: false,
                },
            );
        }

        // The canonical registry is always secure
        index_configs.insert(
            DEFAULT_REGISTRY.to_string(),
            IndexInfo {
                name: DEFAULT_REGISTRY.to_string(),
                mirrors: mirrors.clone(),
                secure: true,
                official: true,
            },
        );

        Ok(Self {
            insecure_cidrs,
            index_configs,
            mirrors,
        })
    }

    pub fn mirrors(&self) -> &[String] {
        &self.mirrors
    }

    pub fn insecure_cidrs(&self) -> &[IpNet] {
        &self.insecure_cidrs
    }

    /// Whether a registry must be reached with verified TLS.
    ///
    /// Explicit entries win. Otherwise the host is resolved and matched
    /// against the insecure CIDRs; `localhost`, `127.0.0.1` and `::1` are
    /// never looked up. A host that does not resolve is secure.
    pub async fn is_secure_index(&self, index_name: &str, resolver: &dyn HostResolver) -> bool {
        if let Some(info) = self.index_configs.get(index_name) {
            return info.secure;
        }

        let host = split_host_port(index_name).0;
        let addrs = match literal_address(host) {
            Some(addr) => vec![addr],
            None => match resolver.lookup(host).await {
                Ok(addrs) => addrs,
                Err(e) => {
                    debug!(host = %host, error = %e, "registry host did not resolve");
                    Vec::new()
                }
            },
        };

        let insecure = addrs
            .iter()
            .any(|addr| self.insecure_cidrs.iter().any(|net| net.contains(addr)));
        !insecure
    }

    /// Describe a registry, classifying it when it is not configured
    pub async fn index_info(&self, index_name: &str, resolver: &dyn HostResolver) -> IndexInfo {
        let name = if is_index_server(index_name) {
            DEFAULT_REGISTRY
        } else {
            index_name
        };

        if let Some(info) = self.index_configs.get(name) {
            return info.clone();
        }

        IndexInfo {
            name: name.to_string(),
            mirrors: Vec::new(),
            secure: self.is_secure_index(name, resolver).await,
            official: false,
        }
    }
}

fn loopback_cidrs() -> Vec<IpNet> {
    ["127.0.0.0/8", "::1/128"]
        .iter()
        .filter_map(|net| net.parse().ok())
        .collect()
}

/// Address for hosts that bypass DNS
fn literal_address(host: &str) -> Option<IpAddr> {
    if host.eq_ignore_ascii_case("localhost") {
        return Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}

/// Drop an `http://` or `https://` prefix, rejecting any other scheme
fn strip_scheme(entry: &str) -> Result<&str> {
    let entry = entry.trim();
    match entry.split_once("://") {
        None => Ok(entry),
        Some(("http" | "https", rest)) => {
            warn!(entry = %entry, "registry entry should not contain a scheme, ignoring it");
            Ok(rest)
        }
        Some((scheme, _)) => Err(RegistryError::InvalidConfig(format!(
            "unsupported scheme {scheme:?} in registry {entry:?}"
        ))),
    }
}

/// Split `host[:port]`, keeping IPv6 brackets on the host
fn split_host_port(entry: &str) -> (&str, Option<&str>) {
    if entry.starts_with('[') {
        return match entry.rsplit_once("]:") {
            Some((host, port)) => (&entry[..host.len() + 1], Some(port)),
            None => (entry, None),
        };
    }
    match entry.split_once(':') {
        Some((host, port)) if !port.contains(':') => (host, Some(port)),
        _ => (entry, None),
    }
}

fn validate_host_port(entry: &str) -> Result<()> {
    let (host, port) = split_host_port(entry);

    if !host_port_regex().is_match(entry) && host.parse::<IpAddr>().is_err() {
        return Err(RegistryError::InvalidConfig(format!("invalid host {host:?}")));
    }

    if let Some(port) = port {
        match port.parse::<u32>() {
            Ok(p) if p <= u32::from(u16::MAX) => {}
            _ => {
                return Err(RegistryError::InvalidConfig(format!("invalid port {port:?}")));
            }
        }
    }
    Ok(())
}

/// Normalize a mirror to `scheme://host[:port]/`
fn validate_mirror(raw: &str) -> Result<String> {
    let url = reqwest::Url::parse(raw.trim())
        .map_err(|e| RegistryError::InvalidConfig(format!("invalid mirror {raw:?}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(RegistryError::InvalidConfig(format!(
            "unsupported scheme {:?} in mirror {raw:?}",
            url.scheme()
        )));
    }
    if (url.path() != "/" && !url.path().is_empty())
        || url.query().is_some()
        || url.fragment().is_some()
        || !url.username().is_empty()
    {
        return Err(RegistryError::InvalidConfig(format!(
            "mirror {raw:?} must be a bare scheme://host[:port]"
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| RegistryError::InvalidConfig(format!("mirror {raw:?} has no host")))?;
    Ok(match url.port() {
        Some(port) => format!("{}://{host}:{port}/", url.scheme()),
        None => format!("{}://{host}/", url.scheme()),
    })
}
