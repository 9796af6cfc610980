//! Credential helper protocol
//!
//! Helpers are executables named `docker-credential-<name>` that speak a
//! JSON protocol over stdin/stdout with four verbs: `store`, `get`, `erase`
//! and `list`. [`Program`] abstracts the process so the native store can be
//! driven by an in-memory fake in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use regcred_core::{CredentialError, Environment};

/// Prefix of every credential helper executable
pub const HELPER_PREFIX: &str = "docker-credential-";

/// Message helpers print when nothing is stored for a server
pub const ERR_CREDENTIALS_NOT_FOUND: &str = "credentials not found in native keychain";

/// Message helpers print when a server URL is missing from the request
pub const ERR_CREDENTIALS_MISSING_SERVER_URL: &str = "no credentials server URL";

/// Username marking the secret as an identity token
pub const TOKEN_USERNAME: &str = "<token>";

/// Helper protocol verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperVerb {
    Store,
    Get,
    Erase,
    List,
}

impl HelperVerb {
    /// Argument passed to the helper executable
    pub fn as_str(&self) -> &'static str {
        match self {
            HelperVerb::Store => "store",
            HelperVerb::Get => "get",
            HelperVerb::Erase => "erase",
            HelperVerb::List => "list",
        }
    }
}

impl std::fmt::Display for HelperVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `store` requests and `get` responses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperCredentials {
    #[serde(rename = "ServerURL", default)]
    pub server_url: String,
    #[serde(rename = "Username", default)]
    pub username: String,
    #[serde(rename = "Secret", default)]
    pub secret: String,
}

/// How a helper invocation failed
#[derive(Debug)]
pub enum HelperFailure {
    /// The executable could not be found
    NotFound,
    /// The process could not be spawned or talked to
    Spawn(std::io::Error),
    /// The helper exited non-zero; carries its diagnostic output
    Exited(String),
}

impl HelperFailure {
    /// Whether the helper reported "credentials not found"
    pub fn is_not_found_message(&self) -> bool {
        match self {
            HelperFailure::Exited(out) => {
                out.contains(ERR_CREDENTIALS_NOT_FOUND)
                    || out.contains(ERR_CREDENTIALS_MISSING_SERVER_URL)
            }
            _ => false,
        }
    }

    /// Translate into the credential error taxonomy
    pub fn into_error(self, helper: &str, verb: HelperVerb) -> CredentialError {
        match self {
            HelperFailure::NotFound => CredentialError::HelperNotFound {
                name: format!("{HELPER_PREFIX}{helper}"),
            },
            HelperFailure::Spawn(e) => CredentialError::storage(format!(
                "error running {HELPER_PREFIX}{helper} {verb}: {e}"
            )),
            HelperFailure::Exited(out) => {
                let out = out.trim();
                let lowered = out.to_ascii_lowercase();
                if lowered.contains("denied") || lowered.contains("unauthorized") {
                    CredentialError::Unauthorized(format!("{HELPER_PREFIX}{helper}: {out}"))
                } else {
                    CredentialError::storage(format!(
                        "error {verb} credentials - err: {HELPER_PREFIX}{helper} exited, out: `{out}`"
                    ))
                }
            }
        }
    }
}

/// A credential helper process
#[async_trait]
pub trait Program: Send + Sync {
    /// Helper name without the `docker-credential-` prefix
    fn name(&self) -> &str;

    /// Run one verb, feeding `input` on stdin and returning stdout
    async fn run(&self, verb: HelperVerb, input: &[u8]) -> std::result::Result<Vec<u8>, HelperFailure>;
}

/// Runs the real `docker-credential-<name>` executable
#[derive(Debug, Clone)]
pub struct ShellProgram {
    name: String,
    executable: PathBuf,
}

impl ShellProgram {
    /// Create a program for a helper name, resolving it through `PATH` when possible
    pub fn new(name: impl Into<String>, env: &Environment) -> Self {
        let name = name.into();
        let binary = format!("{HELPER_PREFIX}{name}");
        let executable = env
            .find_executable(&binary)
            .unwrap_or_else(|| PathBuf::from(binary));
        Self { name, executable }
    }
}

#[async_trait]
impl Program for ShellProgram {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, verb: HelperVerb, input: &[u8]) -> std::result::Result<Vec<u8>, HelperFailure> {
        debug!(helper = %self.name, verb = %verb, "invoking credential helper");

        let mut child = Command::new(&self.executable)
            .arg(verb.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => HelperFailure::NotFound,
                _ => HelperFailure::Spawn(e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).await.map_err(HelperFailure::Spawn)?;
            // Dropping stdin closes the pipe so the helper sees EOF
        }

        let output = child.wait_with_output().await.map_err(HelperFailure::Spawn)?;
        if output.status.success() {
            return Ok(output.stdout);
        }

        let mut message = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if message.is_empty() {
            message = String::from_utf8_lossy(&output.stderr).trim().to_string();
        }
        Err(HelperFailure::Exited(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_payload_field_names() {
        let payload = HelperCredentials {
            server_url: "r.test".to_string(),
            username: "u".to_string(),
            secret: "s".to_string(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"ServerURL":"r.test","Username":"u","Secret":"s"}"#);
    }

    #[test]
    fn test_failure_classification() {
        let not_found = HelperFailure::Exited(ERR_CREDENTIALS_NOT_FOUND.to_string());
        assert!(not_found.is_not_found_message());

        let err = HelperFailure::NotFound.into_error("pass", HelperVerb::Get);
        assert!(matches!(err, CredentialError::HelperNotFound { ref name } if name == "docker-credential-pass"));

        let err = HelperFailure::Exited("access denied by keychain".to_string())
            .into_error("osxkeychain", HelperVerb::Store);
        assert!(err.is_unauthorized());

        let err = HelperFailure::Exited("boom".to_string()).into_error("pass", HelperVerb::List);
        assert!(matches!(err, CredentialError::StorageUnavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_program_round_trip() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("docker-credential-echo");
        std::fs::write(
            &script,
            "#!/bin/sh\nif [ \"$1\" = get ]; then cat >/dev/null; echo '{\"Username\":\"u\",\"Secret\":\"s\"}'; else echo \"$1 unsupported\"; exit 1; fi\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let env = Environment {
            path: Some(dir.path().as_os_str().to_owned()),
            ..Default::default()
        };
        let program = ShellProgram::new("echo", &env);

        let out = program.run(HelperVerb::Get, b"r.test").await.unwrap();
        let creds: HelperCredentials = serde_json::from_slice(&out).unwrap();
        assert_eq!(creds.username, "u");

        match program.run(HelperVerb::List, b"").await {
            Err(HelperFailure::Exited(msg)) => assert_eq!(msg, "list unsupported"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let program = ShellProgram::new("definitely-not-installed", &Environment::default());
        assert!(matches!(
            program.run(HelperVerb::List, b"").await,
            Err(HelperFailure::NotFound)
        ));
    }
}
