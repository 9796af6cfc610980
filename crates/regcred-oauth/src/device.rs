//! Device authorization flow
//!
//! Shows the user code, polls the tenant at the suggested interval until the
//! user approves, and meanwhile offers to open the verification page once
//! the user presses ENTER.

use async_trait::async_trait;
use std::io::{BufRead, Write};
use std::process::Stdio;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use regcred_core::CredentialError;

use crate::error::OAuthError;
use crate::tenant::{DeviceCode, TenantClient, TokenResponse};

/// Lower bound on the poll interval
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Upper bound on the poll interval, `slow_down` included
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound on how long a device code is polled for
const MAX_DEVICE_CODE_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Added to the interval each time the tenant answers `slow_down`
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// User interaction during a device login
#[async_trait]
pub trait Prompt: Send + Sync {
    /// Show the code the user must confirm
    fn show_code(&self, code: &DeviceCode);

    /// Resolve once the user asks to open the browser. Returns `false` when
    /// that will never happen.
    async fn wait_for_enter(&self) -> bool;

    /// Best-effort attempt to open a URL
    fn open_browser(&self, url: &str);
}

/// Prompt on the controlling terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

#[async_trait]
impl Prompt for TerminalPrompt {
    fn show_code(&self, code: &DeviceCode) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "\nUSING WEB-BASED LOGIN");
        let _ = writeln!(stderr, "Your one-time device confirmation code is: {}", code.user_code);
        let _ = writeln!(
            stderr,
            "Press ENTER to open your browser or submit your device code here: {}\n",
            code.verification_uri
        );
        let _ = writeln!(stderr, "Waiting for authentication in the browser...");
    }

    async fn wait_for_enter(&self) -> bool {
        // A blocked stdin read cannot be cancelled, so it gets its own thread
        // that is simply abandoned when the login finishes first.
        let (tx, rx) = oneshot::channel();
        let spawned = std::thread::Builder::new()
            .name("login-keypress".to_string())
            .spawn(move || {
                let mut line = String::new();
                let pressed = std::io::stdin().lock().read_line(&mut line).map(|n| n > 0);
                let _ = tx.send(pressed.unwrap_or(false));
            });

        if spawned.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    fn open_browser(&self, url: &str) {
        open_browser(url);
    }
}

/// Prompt for non-interactive use: logs the code and never opens a browser
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentPrompt;

#[async_trait]
impl Prompt for SilentPrompt {
    fn show_code(&self, code: &DeviceCode) {
        info!(user_code = %code.user_code, uri = %code.verification_uri, "waiting for device login");
    }

    async fn wait_for_enter(&self) -> bool {
        false
    }

    fn open_browser(&self, _url: &str) {}
}

/// Open a URL with the platform's default handler, ignoring failures
pub fn open_browser(url: &str) {
    let mut command = if cfg!(target_os = "macos") {
        let mut c = std::process::Command::new("open");
        c.arg(url);
        c
    } else if cfg!(target_os = "windows") {
        let mut c = std::process::Command::new("rundll32");
        c.args(["url.dll,FileProtocolHandler", url]);
        c
    } else {
        let mut c = std::process::Command::new("xdg-open");
        c.arg(url);
        c
    };

    let result = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    if let Err(e) = result {
        debug!(error = %e, "could not open browser");
    }
}

/// Run a complete device login and return the issued tokens
pub async fn device_login(
    tenant: &TenantClient,
    prompt: &dyn Prompt,
    cancel: &CancellationToken,
) -> Result<TokenResponse, CredentialError> {
    let code = tokio::select! {
        _ = cancel.cancelled() => return Err(CredentialError::Cancelled("login".to_string())),
        code = tenant.device_code() => code?,
    };
    prompt.show_code(&code);

    let poll = poll_for_token(tenant, &code);
    tokio::pin!(poll);
    let keypress = prompt.wait_for_enter();
    tokio::pin!(keypress);
    let mut waiting_for_key = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(CredentialError::Cancelled("login".to_string()));
            }
            result = &mut poll => {
                return result.map_err(CredentialError::from);
            }
            pressed = &mut keypress, if waiting_for_key => {
                waiting_for_key = false;
                if pressed {
                    prompt.open_browser(code.browser_url());
                }
            }
        }
    }
}

/// Poll the token endpoint until the login completes, fails, or the device
/// code expires.
async fn poll_for_token(tenant: &TenantClient, code: &DeviceCode) -> Result<TokenResponse, OAuthError> {
    let deadline = poll_deadline(code.expires_in);
    let mut period = poll_period(code.interval);

    let polling = async {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match tenant.poll_device_token(&code.device_code).await {
                Ok(token) => return Ok(token),
                Err(OAuthError::AuthorizationPending) => {
                    debug!("authorization pending");
                }
                Err(OAuthError::SlowDown) => {
                    period = (period + SLOW_DOWN_STEP).min(MAX_POLL_INTERVAL);
                    warn!(interval = ?period, "tenant asked to slow down polling");
                    ticker = interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                }
                Err(e) => return Err(e),
            }
        }
    };

    timeout_at(deadline, polling)
        .await
        .unwrap_or(Err(OAuthError::Expired))
}

/// When to give up on a device code the tenant says lives `expires_in` seconds
fn poll_deadline(expires_in: u64) -> Instant {
    Instant::now() + Duration::from_secs(expires_in).min(MAX_DEVICE_CODE_LIFETIME)
}

fn poll_period(interval: u64) -> Duration {
    Duration::from_secs(interval).clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}
