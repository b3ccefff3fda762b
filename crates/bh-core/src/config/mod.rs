//! Configuration management for backhaul
//!
//! Both peers load a JSON file at startup. The two sides must agree on
//! `auth` and `separator`; everything else is peer-local.

mod redirector;
mod serde_utils;
mod starter;

pub use redirector::RedirectorConfig;
pub use starter::{Endpoint, StarterConfig};

use std::path::Path;

use crate::error::ConfigError;

/// Load configuration from a JSON file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Unreadable(format!("{}: {}", path.display(), e)))?;

    let config: T = serde_json::from_str(&content)?;
    Ok(config)
}

/// Validate a header/body separator
///
/// The separator is transmitted verbatim between the header tokens and the
/// body, so it must never occur inside a token. Tokens are built from
/// ASCII alphanumerics, `-` (session ids), `;` (port lists), and are
/// delimited by spaces; none of those bytes may appear in the separator.
pub fn validate_separator(separator: &str) -> Result<(), ConfigError> {
    if separator.is_empty() {
        return Err(ConfigError::InvalidSeparator(
            "separator must not be empty".to_string(),
        ));
    }
    let collides = separator
        .bytes()
        .any(|b| b.is_ascii_alphanumeric() || b == b' ' || b == b'-' || b == b';');
    if collides {
        return Err(ConfigError::InvalidSeparator(format!(
            "separator {:?} contains bytes that can occur in header tokens",
            separator
        )));
    }
    Ok(())
}

/// Validate a shared admission secret against a separator
///
/// The secret travels as a single header token, so it must not contain
/// spaces or the separator itself.
pub fn validate_auth(auth: &str, separator: &str) -> Result<(), ConfigError> {
    if auth.is_empty() {
        return Err(ConfigError::InvalidAuth(
            "auth secret must not be empty".to_string(),
        ));
    }
    if auth.chars().any(|c| c.is_whitespace()) {
        return Err(ConfigError::InvalidAuth(
            "auth secret must not contain whitespace".to_string(),
        ));
    }
    if auth.contains(separator) {
        return Err(ConfigError::InvalidAuth(
            "auth secret must not contain the separator".to_string(),
        ));
    }
    Ok(())
}
