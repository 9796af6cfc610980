//! Per-registry TLS material from `<certsDir>/<host>/`
//!
//! `*.crt` files are extra CA roots. `*.cert` / `*.key` files with the same
//! stem form a client certificate pair; either half alone is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{RegistryError, Result};

/// TLS settings for one endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// Skip server certificate verification
    pub insecure_skip_verify: bool,
    /// PEM-encoded extra CA roots
    pub root_certs: Vec<Vec<u8>>,
    /// PEM-encoded client certificate followed by its key
    pub client_identities: Vec<Vec<u8>>,
}

impl TlsConfig {
    /// Build a reqwest client for this config
    pub fn build_client(&self, user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
        let tls_error = |reason: String| RegistryError::Tls {
            path: PathBuf::new(),
            reason,
        };

        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .danger_accept_invalid_certs(self.insecure_skip_verify);

        for pem in &self.root_certs {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| tls_error(format!("invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        // reqwest presents a single client identity
        if let Some(pem) = self.client_identities.first() {
            let identity = reqwest::Identity::from_pem(pem)
                .map_err(|e| tls_error(format!("invalid client certificate: {e}")))?;
            builder = builder.identity(identity);
        }

        builder
            .build()
            .map_err(|e| tls_error(format!("failed to build HTTP client: {e}")))
    }
}

/// Load CA roots and client pairs for one registry host.
///
/// A missing directory yields an empty config.
pub fn load_cert_dir(dir: &Path) -> Result<TlsConfig> {
    let mut config = TlsConfig::default();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(config),
        Err(e) => return Err(tls_io(dir, e)),
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    for path in &files {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("crt") => {
                debug!(path = %path.display(), "loading CA certificate");
                config
                    .root_certs
                    .push(std::fs::read(path).map_err(|e| tls_io(path, e))?);
            }
            Some("cert") => {
                let key = path.with_extension("key");
                if !files.contains(&key) {
                    return Err(RegistryError::Tls {
                        path: path.clone(),
                        reason: format!("missing key {} for client certificate", key.display()),
                    });
                }
                debug!(path = %path.display(), "loading client certificate");
                let mut pem = std::fs::read(path).map_err(|e| tls_io(path, e))?;
                if !pem.ends_with(b"\n") {
                    pem.push(b'\n');
                }
                pem.extend(std::fs::read(&key).map_err(|e| tls_io(&key, e))?);
                config.client_identities.push(pem);
            }
            Some("key") => {
                let cert = path.with_extension("cert");
                if !files.contains(&cert) {
                    return Err(RegistryError::Tls {
                        path: path.clone(),
                        reason: format!("missing client certificate {}", cert.display()),
                    });
                }
            }
            _ => {}
        }
    }

    Ok(config)
}

fn tls_io(path: &Path, err: std::io::Error) -> RegistryError {
    RegistryError::Tls {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}
