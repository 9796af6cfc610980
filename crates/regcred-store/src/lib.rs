//! Layered registry credential stores
//!
//! Every store implements [`CredentialStore`]; layers compose explicitly:
//!
//! ```rust,ignore
//! let file = RoutingStore::from_config(config, &env);
//! let store = EnvStore::wrap(&env, Arc::new(file));
//! ```

pub mod file;
pub mod helper;
pub mod memory;
pub mod native;
pub mod select;
pub mod store;

pub use file::{AuthFile, FileStore};
pub use helper::{
    HelperCredentials, HelperFailure, HelperVerb, Program, ShellProgram,
    ERR_CREDENTIALS_NOT_FOUND, HELPER_PREFIX, TOKEN_USERNAME,
};
pub use memory::{parse_env_auth_config, EnvStore, MemoryStore, ENV_CREDENTIALS_WARNING};
pub use native::NativeStore;
pub use select::{detect_default_helper, ProgramFactory, RoutingStore, DEFAULT_HELPER};
pub use store::{CredentialStore, SharedStore};
