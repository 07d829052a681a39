//! OpenLDAP Exporter
//!
//! Periodically reads the `cn=Monitor` subtree of an OpenLDAP server and
//! republishes it as Prometheus metrics. It can be used as a library by
//! other Rust projects, or run as a standalone binary with the
//! `openldap-exporter` executable.
//!
//! # Architecture
//!
//! - **Directory**: short-lived LDAP sessions behind a connector trait
//! - **Scrape**: query catalog, value parsing, replication token decoding,
//!   primary delay check and the timer-driven scrape loop
//! - **Metrics**: gauge and counter families on a `prometheus::Registry`
//! - **Server**: HTTP exposition and health checks
//!
//! # Example
//!
//! ```rust,no_run
//! use openldap_exporter::{
//!     config::AppConfig,
//!     directory::LdapConnector,
//!     metrics::MetricSink,
//!     scrape::Scraper,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load("configs/config.yaml")?;
//! let sink = MetricSink::new()?;
//! let scraper = Scraper::new(
//!     config.to_scraper_config(),
//!     LdapConnector::new(config.ldap.timeout),
//!     sink.clone(),
//! );
//!
//! let cancel = CancellationToken::new();
//! tokio::spawn(scraper.start(cancel.clone()));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod directory;
pub mod metrics;
pub mod scrape;
pub mod server;

// Re-export commonly used types
pub use config::{AppConfig, ConfigError};
pub use directory::{
    Credentials, DirectoryAddress, DirectoryConnector, DirectoryError, Entry, LdapConnector,
    Transport,
};
pub use metrics::{EntryGauge, MetricSink, MetricsError, ReplicationKind, ScrapeOutcome};
pub use scrape::{QueryCatalog, ScrapeError, Scraper, ScraperConfig};
