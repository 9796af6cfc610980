//! Registry credential records and their on-disk format
//!
//! This module provides the credential record type, key normalization for
//! registry hostnames, and the CLI config file that persists records.

pub mod docker_config;
pub mod resolver;
pub mod types;

pub use docker_config::{AuthEntry, ConfigFile, CONFIG_FILE_NAME};
pub use resolver::{
    auth_config_key, convert_to_hostname, is_index_server, registry_from_reference,
    repository_from_reference, DEFAULT_REGISTRY, DEFAULT_V2_REGISTRY, INDEX_HOSTNAME,
    INDEX_SERVER,
};
pub use types::{
    decode_auth, encode_auth, join_token_pair, AuthConfig, TOKEN_PAIR_SEPARATOR,
};
