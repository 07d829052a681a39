//! Application configuration structures.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::directory::{Credentials, DEFAULT_TIMEOUT, DirectoryAddress, Transport};
use crate::scrape::{DEFAULT_INTERVAL, ScraperConfig};
use crate::server::DEFAULT_METRICS_PATH;

use super::validation::{ConfigError, expand_env_vars, validate_directory_address, validate_dn};

// =============================================================================
// Constants
// =============================================================================

/// Default exporter port.
pub const DEFAULT_PORT: u16 = 9330;

/// Default directory server address.
pub const DEFAULT_LDAP_ADDR: &str = "localhost:389";

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 9330).
    pub port: u16,

    /// Exposition path (default: "/metrics").
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            path: DEFAULT_METRICS_PATH.to_string(),
        }
    }
}

// =============================================================================
// Directory Configuration
// =============================================================================

/// Monitored directory server.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LdapConfig {
    /// Transport kind (default: tcp).
    pub transport: Transport,

    /// `host:port`, or socket path for the unix transport.
    pub addr: String,

    /// Bind DN. Supports `${VAR:-default}`.
    pub user: String,

    /// Bind password. Supports `${VAR:-default}`.
    pub password: String,

    /// Transport timeout (default: 10s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for LdapConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Tcp,
            addr: DEFAULT_LDAP_ADDR.to_string(),
            user: String::new(),
            password: String::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConfig")
            .field("transport", &self.transport)
            .field("addr", &self.addr)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LdapConfig {
    pub fn address(&self) -> DirectoryAddress {
        DirectoryAddress::new(self.transport, self.addr.trim())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.user, &self.password)
    }
}

// =============================================================================
// Scrape / Replication Configuration
// =============================================================================

/// Scrape loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeSettings {
    /// Time between cycles (default: 30s, minimum: 1s).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
        }
    }
}

/// Replication tracking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Base DNs whose contextCSN is tracked.
    pub objects: Vec<String>,

    /// Compare replication tokens against `primary_addr`.
    pub delay_check: bool,

    /// Primary address, same transport as `ldap.transport`.
    pub primary_addr: Option<String>,
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server configuration.
    pub server: ServerConfig,

    /// Monitored directory server.
    pub ldap: LdapConfig,

    /// Scrape loop settings.
    pub scrape: ScrapeSettings,

    /// Replication tracking.
    pub replication: ReplicationConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = serde_yaml::from_str(&content)?;
        config.expand_env();
        config.validate()?;
        Ok(config)
    }

    /// Resolve `${VAR}` references in the bind credentials.
    pub fn expand_env(&mut self) {
        self.ldap.user = expand_env_vars(&self.ldap.user);
        self.ldap.password = expand_env_vars(&self.ldap.password);
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server bind address
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        // Validate server port
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be non-zero".to_string(),
            ));
        }

        if !self.server.path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "server path must start with '/': '{}'",
                self.server.path
            )));
        }
        if matches!(self.server.path.as_str(), "/healthz" | "/readyz") {
            return Err(ConfigError::ValidationError(format!(
                "server path collides with a health endpoint: '{}'",
                self.server.path
            )));
        }

        validate_directory_address(&self.ldap.address())
            .map_err(|e| ConfigError::ValidationError(format!("ldap addr: {}", e)))?;

        let mut seen = std::collections::HashSet::new();
        for object in &self.replication.objects {
            validate_dn(object)
                .map_err(|e| ConfigError::ValidationError(format!("replication object: {}", e)))?;
            if !seen.insert(object.trim().to_lowercase()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate replication object: '{}'",
                    object
                )));
            }
        }

        if self.replication.delay_check {
            let primary = self.primary_address().ok_or_else(|| {
                ConfigError::ValidationError(
                    "replication primary_addr is required when delay_check is enabled"
                        .to_string(),
                )
            })?;
            validate_directory_address(&primary).map_err(|e| {
                ConfigError::ValidationError(format!("replication primary_addr: {}", e))
            })?;
        }

        Ok(())
    }

    /// Primary address, if one is configured.
    pub fn primary_address(&self) -> Option<DirectoryAddress> {
        self.replication
            .primary_addr
            .as_deref()
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(|addr| DirectoryAddress::new(self.ldap.transport, addr))
    }

    /// Build the scrape loop settings.
    ///
    /// The primary is only wired in when `delay_check` is enabled.
    pub fn to_scraper_config(&self) -> ScraperConfig {
        let mut config = ScraperConfig::new(self.ldap.address())
            .with_credentials(self.ldap.credentials())
            .with_interval(self.scrape.interval)
            .with_replication_objects(self.replication.objects.iter().map(|o| o.trim()));

        if let Some(primary) = self
            .primary_address()
            .filter(|_| self.replication.delay_check)
        {
            config = config.with_primary(primary);
        }

        config
    }
}
