//! Process environment and directory layout
//!
//! The credential subsystem never reads environment variables on its own.
//! [`Environment`] is captured once at program start and passed to whatever
//! needs it, so tests can construct any environment they like.

use std::path::{Path, PathBuf};

/// Inline JSON credential overlay
pub const ENV_AUTH_CONFIG: &str = "DOCKER_AUTH_CONFIG";

/// Config directory override
pub const ENV_CONFIG_DIR: &str = "DOCKER_CONFIG";

/// Set by rootlesskit; switches the certificates directory to a per-user path
pub const ENV_ROOTLESSKIT_STATE_DIR: &str = "ROOTLESSKIT_STATE_DIR";

/// Name of the config directory under the home directory
pub const CONFIG_DIR_NAME: &str = ".docker";

/// System-wide certificates directory
pub const SYSTEM_CERTS_DIR: &str = "/etc/docker/certs.d";

/// Socket file name used by the credential server, identical on all platforms
pub const CREDENTIAL_SOCKET_NAME: &str = "credentials";

/// Snapshot of the environment the credential subsystem depends on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    /// Raw `DOCKER_AUTH_CONFIG`
    pub auth_config: Option<String>,
    /// `DOCKER_CONFIG`
    pub config_dir: Option<PathBuf>,
    /// `ROOTLESSKIT_STATE_DIR`
    pub rootlesskit_state_dir: Option<PathBuf>,
    /// `XDG_CONFIG_HOME`
    pub xdg_config_home: Option<PathBuf>,
    /// Home directory
    pub home_dir: Option<PathBuf>,
    /// `PATH`, used to locate credential helpers
    pub path: Option<std::ffi::OsString>,
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Environment {
    /// Capture the current process environment
    pub fn from_process() -> Self {
        Self {
            auth_config: non_empty_var(ENV_AUTH_CONFIG),
            config_dir: non_empty_var(ENV_CONFIG_DIR).map(PathBuf::from),
            rootlesskit_state_dir: non_empty_var(ENV_ROOTLESSKIT_STATE_DIR).map(PathBuf::from),
            xdg_config_home: non_empty_var("XDG_CONFIG_HOME").map(PathBuf::from),
            home_dir: dirs::home_dir(),
            path: std::env::var_os("PATH"),
        }
    }

    /// Directory holding `config.json` and the credential socket
    pub fn config_dir(&self) -> PathBuf {
        if let Some(dir) = &self.config_dir {
            return dir.clone();
        }
        match &self.home_dir {
            Some(home) => home.join(CONFIG_DIR_NAME),
            None => PathBuf::from(CONFIG_DIR_NAME),
        }
    }

    /// Directory holding per-registry TLS material
    pub fn certs_dir(&self) -> PathBuf {
        if self.rootlesskit_state_dir.is_none() {
            return PathBuf::from(SYSTEM_CERTS_DIR);
        }

        let config_home = self.xdg_config_home.clone().or_else(|| {
            self.home_dir
                .as_ref()
                .map(|home| home.join(".config"))
        });

        match config_home {
            Some(dir) => dir.join("docker").join("certs.d"),
            None => PathBuf::from(SYSTEM_CERTS_DIR),
        }
    }

    /// Path of the credential server socket
    pub fn credential_socket_path(&self) -> PathBuf {
        credential_socket_path(&self.config_dir())
    }

    /// Whether `DOCKER_AUTH_CONFIG` is set
    pub fn has_env_credentials(&self) -> bool {
        self.auth_config.is_some()
    }

    /// Look for an executable in `PATH`
    pub fn find_executable(&self, name: &str) -> Option<PathBuf> {
        let path = self.path.as_ref()?;
        std::env::split_paths(path)
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }
}

/// `<configDir>/run/<name>.sock`
pub fn credential_socket_path(config_dir: &Path) -> PathBuf {
    config_dir
        .join("run")
        .join(format!("{CREDENTIAL_SOCKET_NAME}.sock"))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}
