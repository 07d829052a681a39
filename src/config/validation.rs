//! Configuration validation utilities.

use std::time::Duration;

use thiserror::Error;

use crate::directory::DirectoryAddress;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Parse duration string using humantime.
///
/// Supports various formats: `30s`, `1m`, `5m30s`, `1h`, `100ms`, etc.
///
/// # Examples
///
/// ```
/// use openldap_exporter::config::parse_duration;
///
/// assert_eq!(parse_duration("15s").unwrap().as_secs(), 15);
/// assert_eq!(parse_duration("2m").unwrap().as_secs(), 120);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Expand environment variables in a string.
/// Supports ${VAR} and ${VAR:-default} syntax.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

/// Check that a directory address can be dialed.
pub fn validate_directory_address(addr: &DirectoryAddress) -> Result<(), String> {
    let raw = addr.url().map_err(|e| e.to_string())?;
    url::Url::parse(&raw).map_err(|e| format!("invalid address '{}': {}", addr.addr, e))?;
    Ok(())
}

/// Loose distinguished-name check: every RDN must be `attr=value`.
pub fn validate_dn(dn: &str) -> Result<(), String> {
    let dn = dn.trim();
    if dn.is_empty() {
        return Err("dn cannot be empty".to_string());
    }

    for rdn in split_rdns(dn) {
        match rdn.split_once('=') {
            Some((attr, value)) if !attr.trim().is_empty() && !value.trim().is_empty() => {}
            _ => return Err(format!("invalid RDN '{}' in dn '{}'", rdn.trim(), dn)),
        }
    }

    Ok(())
}

/// Split a DN on unescaped commas.
fn split_rdns(dn: &str) -> Vec<&str> {
    let mut rdns = Vec::new();
    let mut start = 0;
    let mut escaped = false;

    for (i, c) in dn.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            ',' => {
                rdns.push(&dn[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    rdns.push(&dn[start..]);
    rdns
}
