//! Scrape Engine
//!
//! Turns the directory server's monitoring subtree into metric points.
//!
//! # Architecture
//!
//! - [`QueryCatalog`]: ordered monitoring queries, built once per scraper
//! - [`parser`]: plain numeric values and replication token decoding
//! - [`DelayChecker`]: replication delay against a designated primary
//! - [`Scraper`]: timer-driven loop running one cycle per tick
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use openldap_exporter::directory::{DirectoryAddress, LdapConnector, Transport};
//! use openldap_exporter::metrics::MetricSink;
//! use openldap_exporter::scrape::{Scraper, ScraperConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ScraperConfig::new(DirectoryAddress::new(Transport::Tcp, "localhost:389"))
//!     .with_interval(Duration::from_secs(15))
//!     .with_replication_objects(["dc=example,dc=com"]);
//! let sink = MetricSink::new()?;
//! let scraper = Scraper::new(config, LdapConnector::default(), sink.clone());
//!
//! let cancel = CancellationToken::new();
//! tokio::spawn(scraper.start(cancel.clone()));
//! # Ok(())
//! # }
//! ```

pub mod catalog;
mod error;
pub mod parser;
mod replication;
mod scraper;

pub use catalog::{QueryCatalog, QueryDescriptor, QueryKind};
pub use error::ScrapeError;
pub use parser::{ReplicationToken, TokenError};
pub use replication::{DelayChecker, replication_delay};
pub use scraper::{DEFAULT_INTERVAL, MIN_INTERVAL, Scraper, ScraperConfig, ScraperState};
