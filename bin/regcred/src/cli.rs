use clap::{Parser, Subcommand};
use regcred_observability::LogFormat;
use std::path::PathBuf;

/// Registry credential manager
#[derive(Parser)]
#[command(name = "regcred")]
#[command(version, about = "Log in to container registries and manage stored credentials")]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Location of the client config directory
    #[arg(long, env = "DOCKER_CONFIG", global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbose: u8,

    /// Log format on stderr (pretty, json, compact)
    #[arg(long, global = true)]
    pub(crate) log_format: Option<LogFormat>,

    /// Read and write credentials through the credential server socket
    #[arg(long, env = "REGCRED_CREDENTIAL_SOCKET", global = true)]
    pub(crate) credential_socket: bool,

    /// Registry allowed without verified TLS (CIDR or host[:port])
    #[arg(long = "insecure-registry", global = true)]
    pub(crate) insecure_registries: Vec<String>,

    /// Pull-through mirror for the canonical registry
    #[arg(long = "registry-mirror", global = true)]
    pub(crate) registry_mirrors: Vec<String>,

    /// OAuth tenant used for web-based login to the canonical registry
    #[arg(long, env = "REGCRED_OAUTH_TENANT", hide = true, global = true)]
    pub(crate) oauth_tenant: Option<String>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// CLI subcommands
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Log in to a registry
    ///
    /// Without a server and username, logs in to the canonical registry
    /// with a one-time device code confirmed in the browser.
    Login {
        /// Registry to log in to (defaults to the canonical index)
        server: Option<String>,

        /// Username
        #[arg(short, long)]
        username: Option<String>,

        /// Password or personal access token
        #[arg(short, long, conflicts_with = "password_stdin")]
        password: Option<String>,

        /// Take the password from stdin
        #[arg(long, requires = "username")]
        password_stdin: bool,
    },

    /// Log out from a registry
    Logout {
        /// Registry to log out from (defaults to the canonical index)
        server: Option<String>,
    },

    /// Inspect and edit stored credentials
    #[command(subcommand)]
    Credentials(CredentialsCommand),

    /// Serve the credential store on a Unix socket until idle
    CredentialServer {
        /// Seconds without open connections before the server exits
        #[arg(long, default_value_t = 10)]
        idle_timeout: u64,
    },
}

/// `credentials` subcommands
#[derive(Subcommand)]
pub(crate) enum CredentialsCommand {
    /// Print the record stored for a registry as JSON
    Get {
        /// Registry server address
        server: String,
    },

    /// List registries with stored credentials and their usernames
    List,

    /// Store a JSON record read from stdin
    Store,

    /// Remove the record stored for a registry
    Erase {
        /// Registry server address
        server: String,
    },
}
