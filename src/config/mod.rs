//! Configuration module for the exporter.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (bind address, port, exposition path)
//! - The monitored directory server and its bind credentials
//! - Scrape interval and replication tracking

mod app;
mod validation;

pub use app::{AppConfig, LdapConfig, ReplicationConfig, ScrapeSettings, ServerConfig};
pub use validation::{
    ConfigError, expand_env_vars, parse_duration, validate_directory_address, validate_dn,
};

// Re-export constants
pub use app::{DEFAULT_LDAP_ADDR, DEFAULT_PORT};
