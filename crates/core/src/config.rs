//! Environment-variable helpers shared by the `from_env` constructors.
//!
//! Every configuration struct in the workspace is read once at process
//! start and then passed around by value; nothing re-reads the
//! environment after startup.

use std::str::FromStr;

use crate::error::CoreError;

/// Read `key`, falling back to `default` when unset.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read `key` if set and non-empty.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse `key`, falling back to `default` when unset.
///
/// A value that is present but unparseable is a configuration error
/// rather than a silent fallback.
pub fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, CoreError> {
    match env_opt(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

/// Parse a raw value for `key`, reporting the key on failure.
pub fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, CoreError> {
    raw.trim()
        .parse()
        .map_err(|_| CoreError::Config(format!("{key} has an invalid value '{raw}'")))
}

/// Parse a boolean flag (`1`/`true`/`yes`/`on`, case-insensitive).
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
