//! Configuration validation.
//!
//! Every check pushes onto a shared error list so that a single
//! `ConfigError` reports all problems at once.

mod helpers;


use tandem_common::ConfigError;

use crate::schema::RelayConfig;
use helpers::validate_range;

const MAX_CHANNEL_CAPACITY: u64 = 65_536;
const MIN_MESSAGE_BYTES: u64 = 1024;
const MAX_MESSAGE_BYTES: u64 = 16 * 1024 * 1024;
const MAX_IDLE_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &RelayConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_range(&mut errors, "port", u64::from(config.port), 1, u64::from(u16::MAX));
    validate_range(
        &mut errors,
        "channel_capacity",
        config.channel_capacity as u64,
        1,
        MAX_CHANNEL_CAPACITY,
    );
    validate_range(
        &mut errors,
        "max_message_bytes",
        config.max_message_bytes as u64,
        MIN_MESSAGE_BYTES,
        MAX_MESSAGE_BYTES,
    );
    validate_range(
        &mut errors,
        "idle_timeout_secs",
        config.idle_timeout_secs,
        0,
        MAX_IDLE_TIMEOUT_SECS,
    );
    validate_origins(&mut errors, &config.allowed_origins);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_origins(errors: &mut Vec<String>, origins: &[String]) {
    if origins.is_empty() {
        errors.push("allowed_origins must not be empty".into());
        return;
    }

    let has_wildcard = origins.iter().any(|o| o.trim() == "*");
    if has_wildcard && origins.len() > 1 {
        errors.push("allowed_origins: \"*\" cannot be combined with explicit origins".into());
    }

    for origin in origins.iter().map(|o| o.trim()).filter(|o| *o != "*") {
        let rest = origin
            .strip_prefix("https://")
            .or_else(|| origin.strip_prefix("http://"));
        match rest {
            Some(host) if !host.trim_end_matches('/').is_empty() && !host.contains(' ') => {}
            _ => errors.push(format!(
                "allowed_origins: {origin:?} is not \"*\" or an http(s) origin"
            )),
        }
    }
}
