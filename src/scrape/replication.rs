//! Replication delay against a primary node.
//!
//! After a replication query ran locally, the same search is issued against
//! the primary over a dedicated connection. The delay is the primary's token
//! timestamp minus the locally cached one.

use crate::directory::{Credentials, DirectoryAddress, DirectoryConnector, open_session};
use crate::metrics::{MetricSink, ReplicationKind};

use super::catalog::QueryDescriptor;
use super::error::ScrapeError;
use super::parser::TokenFields;

/// Delay of a replica behind the primary, in seconds.
pub fn replication_delay(primary_time: f64, local_time: f64) -> f64 {
    primary_time - local_time
}

/// Cross-checks replication tokens with the primary node.
#[derive(Debug, Clone)]
pub struct DelayChecker {
    primary: DirectoryAddress,
    credentials: Credentials,
}

impl DelayChecker {
    pub fn new(primary: DirectoryAddress, credentials: Credentials) -> Self {
        Self {
            primary,
            credentials,
        }
    }

    pub fn primary(&self) -> &DirectoryAddress {
        &self.primary
    }

    /// Publish the `delay` point for one replication query.
    ///
    /// # Errors
    /// Any dial, bind or search failure, an empty result set and an
    /// undecodable primary timestamp fail the cycle.
    pub async fn check(
        &self,
        connector: &dyn DirectoryConnector,
        query: &QueryDescriptor,
        sink: &MetricSink,
    ) -> Result<(), ScrapeError> {
        let mut session = open_session(connector, &self.primary, &self.credentials)
            .await
            .map_err(ScrapeError::Primary)?;
        let result = session
            .search(&query.base_dn, &query.filter, &query.attribute)
            .await;
        session.close().await;

        let entries = result.map_err(ScrapeError::Primary)?;
        let Some(entry) = entries.first() else {
            return Err(ScrapeError::EmptyPrimaryResult {
                base_dn: query.base_dn.clone(),
            });
        };

        let Some(raw) = entry.attr(&query.attribute) else {
            tracing::debug!(
                primary = %self.primary,
                dn = %entry.dn,
                attr = %query.attribute,
                "Primary entry carries no replication token"
            );
            return Ok(());
        };

        let fields = TokenFields::split(raw).map_err(ScrapeError::PrimaryToken)?;
        let primary_time = fields.time().map_err(ScrapeError::PrimaryToken)?;

        let Some(local_time) = query.last_local_time() else {
            tracing::warn!(
                base_dn = %query.base_dn,
                sid = %fields.server_id,
                "No local replication timestamp observed yet, skipping delay"
            );
            return Ok(());
        };

        let delay = replication_delay(primary_time, local_time);
        sink.set_replication(fields.server_id, ReplicationKind::Delay, delay);
        tracing::debug!(base_dn = %query.base_dn, sid = %fields.server_id, delay, "Replication delay updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{Entry, MemoryDirectory, MemoryServer, SessionStats, Transport};
    use crate::scrape::catalog::CONTEXT_CSN;

    const BASE: &str = "dc=example,dc=com";

    fn server(token: &str) -> MemoryServer {
        MemoryServer::new().with_entry(
            Entry::new(BASE)
                .with_attr("objectClass", "dcObject")
                .with_attr(CONTEXT_CSN, token),
        )
    }

    fn checker() -> DelayChecker {
        DelayChecker::new(
            DirectoryAddress::new(Transport::Tcp, "primary:389"),
            Credentials::anonymous(),
        )
    }

    /// A query whose local cache holds `token`'s timestamp.
    fn local_query(token: &str) -> QueryDescriptor {
        let sink = MetricSink::new().unwrap();
        let mut query = QueryDescriptor::replication(BASE);
        query.apply(&[Entry::new(BASE).with_attr(CONTEXT_CSN, token)], &sink);
        query
    }

    #[test]
    fn test_delay_is_primary_minus_local() {
        assert_eq!(replication_delay(1010.0, 1000.0), 10.0);
        assert_eq!(replication_delay(1000.0, 1000.0), 0.0);
        assert_eq!(replication_delay(990.0, 1000.0), -10.0);
    }

    #[tokio::test]
    async fn test_check_publishes_delay() {
        let dir = MemoryDirectory::new().with_server("primary:389", server("20211001120010Z#9#001#0"));
        let sink = MetricSink::new().unwrap();
        let query = local_query("20211001120000Z#5#001#0");

        checker().check(&dir, &query, &sink).await.unwrap();

        assert_eq!(sink.replication_value("001", ReplicationKind::Delay), Some(10.0));
        assert_eq!(dir.stats(), SessionStats { opened: 1, closed: 1 });
    }

    #[tokio::test]
    async fn test_check_primary_unreachable() {
        let dir = MemoryDirectory::new();
        let sink = MetricSink::new().unwrap();
        let query = local_query("20211001120000Z#5#001#0");

        let result = checker().check(&dir, &query, &sink).await;

        assert!(matches!(result, Err(ScrapeError::Primary(_))));
        assert_eq!(sink.replication_value("001", ReplicationKind::Delay), None);
    }

    #[tokio::test]
    async fn test_check_empty_result_fails() {
        let dir = MemoryDirectory::new().with_server("primary:389", MemoryServer::new());
        let sink = MetricSink::new().unwrap();
        let query = local_query("20211001120000Z#5#001#0");

        let result = checker().check(&dir, &query, &sink).await;

        assert!(matches!(result, Err(ScrapeError::EmptyPrimaryResult { .. })));
        assert_eq!(dir.stats(), SessionStats { opened: 1, closed: 1 });
    }

    #[tokio::test]
    async fn test_check_bad_primary_timestamp_fails() {
        let dir = MemoryDirectory::new().with_server("primary:389", server("not-a-time#9#001#0"));
        let sink = MetricSink::new().unwrap();
        let query = local_query("20211001120000Z#5#001#0");

        let result = checker().check(&dir, &query, &sink).await;

        assert!(matches!(result, Err(ScrapeError::PrimaryToken(_))));
    }

    #[tokio::test]
    async fn test_check_search_failure_closes_session() {
        let dir = MemoryDirectory::new().with_server(
            "primary:389",
            server("20211001120010Z#9#001#0").failing_search(BASE),
        );
        let sink = MetricSink::new().unwrap();
        let query = local_query("20211001120000Z#5#001#0");

        let result = checker().check(&dir, &query, &sink).await;

        assert!(matches!(result, Err(ScrapeError::Primary(_))));
        assert_eq!(dir.stats(), SessionStats { opened: 1, closed: 1 });
    }

    #[tokio::test]
    async fn test_check_without_local_time_skips() {
        let dir = MemoryDirectory::new().with_server("primary:389", server("20211001120010Z#9#001#0"));
        let sink = MetricSink::new().unwrap();
        let query = QueryDescriptor::replication(BASE);

        checker().check(&dir, &query, &sink).await.unwrap();

        assert_eq!(sink.replication_value("001", ReplicationKind::Delay), None);
    }
}
