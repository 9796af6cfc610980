//! regcred core types
//!
//! This crate provides the credential record, the CLI config file format,
//! environment/directory resolution and the error taxonomy shared by every
//! regcred crate.

pub mod auth;
pub mod config;
pub mod error;

pub use auth::*;
pub use config::*;
pub use error::*;

/// User-Agent sent with every outgoing tenant and registry request
pub fn user_agent() -> String {
    format!("regcred/{}", env!("CARGO_PKG_VERSION"))
}
