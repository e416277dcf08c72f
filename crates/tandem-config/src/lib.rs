//! Tandem relay configuration.
//!
//! A single `RelayConfig` section with serde defaults, so an empty or
//! partial TOML file yields a usable config. Command-line and environment
//! overrides are applied by the binary on top of what is loaded here;
//! call [`validation::validate`] on the final result.
//!
//! ```rust,no_run
//! use std::path::Path;
//! use tandem_config::{load_config, validation};
//!
//! let config = load_config(Some(Path::new("tandem.toml"))).expect("failed to load config");
//! validation::validate(&config).expect("invalid config");
//! ```

pub mod origins;
pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use origins::OriginPolicy;
pub use schema::RelayConfig;

use std::path::Path;

use tandem_common::ConfigError;

/// Load the config from `path`, or the built-in defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig, ConfigError> {
    match path {
        Some(path) => toml_loader::load_from_path(path),
        None => Ok(RelayConfig::default()),
    }
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &RelayConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}
