//! TOML config file loading.

use std::path::Path;

use tandem_common::ConfigError;
use tracing::info;

use crate::schema::RelayConfig;

/// Load config from a specific TOML file path.
///
/// Missing fields fall back to serde defaults. The result is not validated
/// here because command-line overrides are applied afterwards.
pub fn load_from_path(path: &Path) -> Result<RelayConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::ParseError(format!("failed to read {}: {e}", path.display()))
    })?;

    let config = parse_str(&content)?;
    info!("loaded config from {}", path.display());
    Ok(config)
}

/// Parse a TOML document into a config.
pub fn parse_str(content: &str) -> Result<RelayConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))
}
