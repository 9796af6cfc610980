//! regcred -- log in to container registries and manage stored credentials.
//!
//! Credentials live in the client config file or a native credential
//! helper, can be overridden through `DOCKER_AUTH_CONFIG`, and are exposed
//! to other processes by `regcred credential-server`.

mod app;
mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use app::App;
use cli::{Cli, Commands};
use regcred_core::{CredentialError, Environment, EXIT_FAILURE};
use regcred_observability::{init_logging, LogFormat, LogLevel, LoggingConfig};

/// How long a command may take to wind down after Ctrl-C
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = LogLevel::from_verbosity(cli.verbose);
    let format = cli.log_format.unwrap_or_else(|| {
        if std::io::stderr().is_terminal() {
            LogFormat::Compact
        } else {
            LogFormat::Json
        }
    });
    let logging = LoggingConfig {
        level,
        format,
        // Keep HTTP internals quiet unless asked for
        filter_directives: (cli.verbose < 3)
            .then(|| format!("{},hyper=warn,reqwest=warn,rustls=warn", level.as_str())),
        ..Default::default()
    };

    let _guard = match init_logging(&logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if let Some(hint) = credential_error(&e).and_then(CredentialError::suggestion) {
                eprintln!("Hint: {hint}");
            }
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cancel = CancellationToken::new();
    let app = App::new(&cli, Environment::from_process(), cancel.clone());

    let work = dispatch(&cli, &app);
    tokio::pin!(work);

    tokio::select! {
        result = &mut work => result,
        _ = tokio::signal::ctrl_c() => {
            debug!("interrupt received");
            cancel.cancel();
            match tokio::time::timeout(INTERRUPT_GRACE, &mut work).await {
                Ok(result) => result,
                Err(_) => Err(CredentialError::Cancelled("operation".to_string()).into()),
            }
        }
    }
}

async fn dispatch(cli: &Cli, app: &App) -> Result<()> {
    match &cli.command {
        Commands::Login {
            server,
            username,
            password,
            password_stdin,
        } => {
            commands::login::handle_login(
                app,
                server.as_deref(),
                username.as_deref(),
                password.as_deref(),
                *password_stdin,
            )
            .await
        }
        Commands::Logout { server } => {
            commands::logout::handle_logout(app, server.as_deref()).await
        }
        Commands::Credentials(command) => {
            commands::credentials::handle_credentials(app, command).await
        }
        Commands::CredentialServer { idle_timeout } => {
            commands::server::handle_credential_server(app, Duration::from_secs(*idle_timeout))
                .await
        }
    }
}

/// The credential error at the root of a failure, if there is one
fn credential_error(err: &anyhow::Error) -> Option<&CredentialError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CredentialError>())
}

fn exit_code(err: &anyhow::Error) -> u8 {
    let code = credential_error(err).map_or(EXIT_FAILURE, CredentialError::exit_code);
    u8::try_from(code).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_code_from_credential_error() {
        let err = anyhow::Error::from(CredentialError::HelperNotFound {
            name: "docker-credential-pass".to_string(),
        });
        assert_eq!(exit_code(&err), 127);

        let err: anyhow::Error = Err::<(), _>(CredentialError::invalid("bad mirror"))
            .context("Invalid registry configuration")
            .unwrap_err();
        assert_eq!(exit_code(&err), 125);
    }

    #[test]
    fn test_exit_code_defaults_to_failure() {
        let err = anyhow::anyhow!("something else broke");
        assert_eq!(exit_code(&err), 1);
        assert!(credential_error(&err).is_none());
    }

    #[test]
    fn test_exit_code_permission_denied() {
        let err = anyhow::Error::from(CredentialError::io(
            "/home/alice/.docker/config.json",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        ));
        assert_eq!(exit_code(&err), 126);
    }
}
