//! regcred observability
//!
//! Structured logging for the regcred binaries: compact, pretty or JSON
//! output on stderr, plus an optional rotating JSON log file.
//!
//! ```no_run
//! use regcred_observability::{init_logging, LoggingConfig};
//!
//! let _guard = init_logging(&LoggingConfig::default()).expect("logging");
//! tracing::info!("started");
//! ```

pub mod config;
pub mod error;
pub mod logging;

pub use config::*;
pub use error::{ObservabilityError, Result};
pub use logging::{init_logging, LogGuard};
