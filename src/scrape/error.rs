//! Cycle-level scrape errors.
//!
//! Only failures that abort a cycle are represented here. Per-query search
//! failures and token decoding problems are logged where they happen.

use thiserror::Error;

use crate::directory::DirectoryError;

use super::parser::TokenError;

/// Errors that abort a scrape cycle.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Dial or bind against the monitored server failed.
    #[error("directory unavailable: {0}")]
    Directory(#[source] DirectoryError),

    /// Dial, bind or search against the primary failed.
    #[error("primary check failed: {0}")]
    Primary(#[source] DirectoryError),

    /// The primary returned no entry for the replication query.
    #[error("primary returned no entries under '{base_dn}'")]
    EmptyPrimaryResult { base_dn: String },

    /// The primary's replication token could not be decoded.
    #[error("primary token invalid: {0}")]
    PrimaryToken(#[source] TokenError),
}
