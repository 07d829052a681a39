//! Directory Access Layer
//!
//! Short-lived connections to a directory server. Every scrape cycle opens
//! its own session, issues one subtree search per query and closes the
//! session again, whatever the outcome.
//!
//! # Components
//!
//! - [`DirectoryConnector`] / [`DirectorySession`]: connection seam used by the scraper
//! - [`LdapConnector`]: `ldap3`-backed implementation
//! - `MemoryDirectory`: in-memory implementation for tests (`test-util` feature)
//! - [`Entry`]: one search result (DN plus attribute values)
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use openldap_exporter::directory::{
//!     Credentials, DirectoryAddress, LdapConnector, Transport, open_session,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = LdapConnector::new(Duration::from_secs(5));
//! let addr = DirectoryAddress::new(Transport::Tcp, "localhost:389");
//! let mut session = open_session(&connector, &addr, &Credentials::anonymous()).await?;
//! let entries = session
//!     .search("cn=Monitor", "(objectClass=monitorCounterObject)", "monitorCounter")
//!     .await;
//! session.close().await;
//! println!("{} entries", entries?.len());
//! # Ok(())
//! # }
//! ```

mod ldap;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
mod traits;

pub use ldap::{DEFAULT_TIMEOUT, LdapConnector};
#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryDirectory, MemoryServer, SessionStats};
pub use traits::{
    Credentials, DirectoryAddress, DirectoryConnector, DirectoryError, DirectorySession, Entry,
    Transport, open_session,
};
