//! Scrape scheduler.
//!
//! One timer-driven loop runs the full query catalog per tick. Cycles never
//! overlap: ticks missed while a cycle is running are skipped, not queued,
//! and cancellation is only observed between cycles.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::directory::{
    Credentials, DirectoryAddress, DirectoryConnector, DirectorySession, LdapConnector,
    open_session,
};
use crate::metrics::{MetricSink, ScrapeOutcome};

use super::catalog::QueryCatalog;
use super::error::ScrapeError;
use super::replication::DelayChecker;

/// Default scrape interval (30 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Minimum allowed interval (1 second).
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Settings of a [`Scraper`].
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Monitored directory server.
    pub address: DirectoryAddress,
    /// Bind credentials for the monitored server and the primary.
    pub credentials: Credentials,
    /// Time between cycle starts.
    pub interval: Duration,
    /// Base DNs whose replication token is tracked.
    pub replication_objects: Vec<String>,
    /// Primary to compute replication delay against, if enabled.
    pub primary: Option<DirectoryAddress>,
}

impl ScraperConfig {
    pub fn new(address: DirectoryAddress) -> Self {
        Self {
            address,
            credentials: Credentials::anonymous(),
            interval: DEFAULT_INTERVAL,
            replication_objects: Vec::new(),
            primary: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the scrape interval.
    ///
    /// Interval is clamped to a minimum of 1 second.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            tracing::warn!(min_interval = ?MIN_INTERVAL,
                "Interval duration is less than minimum allowed. Using minimum duration."
            );
            self.interval = MIN_INTERVAL;
        } else {
            self.interval = interval;
        }
        self
    }

    pub fn with_replication_objects<I, S>(mut self, objects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replication_objects = objects.into_iter().map(Into::into).collect();
        self
    }

    /// Enable delay checking against `primary`.
    pub fn with_primary(mut self, primary: DirectoryAddress) -> Self {
        self.primary = Some(primary);
        self
    }
}

/// Lifecycle of the scrape loop.
///
/// Observable from outside the loop through [`Scraper::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScraperState {
    Idle,
    Scraping,
    Stopped,
}

/// Periodically scrapes a directory server into a [`MetricSink`].
pub struct Scraper<C: DirectoryConnector = LdapConnector> {
    config: ScraperConfig,
    connector: C,
    catalog: QueryCatalog,
    sink: MetricSink,
    delay_checker: Option<DelayChecker>,
    state: watch::Sender<ScraperState>,
}

impl<C: DirectoryConnector> Scraper<C> {
    /// Create a scraper. The query catalog is built here, exactly once.
    pub fn new(config: ScraperConfig, connector: C, sink: MetricSink) -> Self {
        let catalog = QueryCatalog::new(&config.replication_objects);
        let delay_checker = config
            .primary
            .clone()
            .map(|primary| DelayChecker::new(primary, config.credentials.clone()));

        Self {
            config,
            connector,
            catalog,
            sink,
            delay_checker,
            state: watch::Sender::new(ScraperState::Idle),
        }
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub fn catalog(&self) -> &QueryCatalog {
        &self.catalog
    }

    pub fn sink(&self) -> &MetricSink {
        &self.sink
    }

    pub fn state(&self) -> ScraperState {
        *self.state.borrow()
    }

    /// Watch state transitions, including the final `Stopped`.
    pub fn subscribe(&self) -> watch::Receiver<ScraperState> {
        self.state.subscribe()
    }

    /// Run cycles until `cancel` fires.
    ///
    /// The first cycle starts one interval after the call. A cycle in
    /// progress always runs to completion before cancellation is honored.
    pub async fn start(mut self, cancel: CancellationToken) {
        let span = tracing::info_span!("scraper", addr = %self.config.address);

        async move {
            let interval = self.config.interval;
            tracing::info!(
                interval = ?interval,
                queries = self.catalog.len(),
                replication = self.catalog.replication_count(),
                delay_check = self.delay_checker.is_some(),
                "Starting monitor loop"
            );

            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }

            self.state.send_replace(ScraperState::Stopped);
            tracing::info!("Monitor loop stopped");
        }
        .instrument(span)
        .await
    }

    /// Run one full cycle and record its outcome.
    pub async fn run_once(&mut self) -> ScrapeOutcome {
        self.state.send_replace(ScraperState::Scraping);
        let start = std::time::Instant::now();

        let outcome = match self.scrape().await {
            Ok(all_queries_ok) => ScrapeOutcome::from(all_queries_ok),
            Err(e) => {
                tracing::error!(error = %e, "Scrape cycle aborted");
                ScrapeOutcome::Fail
            }
        };

        self.sink.record_outcome(outcome);
        self.state.send_replace(ScraperState::Idle);

        let duration_ms = start.elapsed().as_millis();
        tracing::debug!(result = %outcome, duration_ms, "Scrape cycle finished");
        outcome
    }

    /// `Ok(false)` when at least one query failed but the cycle completed.
    async fn scrape(&mut self) -> Result<bool, ScrapeError> {
        let mut session = open_session(
            &self.connector,
            &self.config.address,
            &self.config.credentials,
        )
        .await
        .map_err(ScrapeError::Directory)?;

        let result = self.scrape_catalog(session.as_mut()).await;
        session.close().await;
        result
    }

    async fn scrape_catalog(
        &mut self,
        session: &mut dyn DirectorySession,
    ) -> Result<bool, ScrapeError> {
        let mut all_ok = true;

        for query in self.catalog.iter_mut() {
            match session
                .search(&query.base_dn, &query.filter, &query.attribute)
                .await
            {
                Ok(entries) => query.apply(&entries, &self.sink),
                Err(e) => {
                    tracing::warn!(
                        filter = %query.filter,
                        base_dn = %query.base_dn,
                        error = %e,
                        "Query failed"
                    );
                    all_ok = false;
                }
            }

            if !query.is_replication() {
                continue;
            }
            if let Some(checker) = &self.delay_checker {
                checker.check(&self.connector, query, &self.sink).await?;
            }
        }

        Ok(all_ok)
    }
}

impl<C: DirectoryConnector> std::fmt::Debug for Scraper<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scraper")
            .field("config", &self.config)
            .field("queries", &self.catalog.len())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{Entry, MemoryDirectory, MemoryServer, Transport};
    use crate::metrics::EntryGauge;

    fn memory_scraper(dir: MemoryDirectory, config: ScraperConfig) -> Scraper<MemoryDirectory> {
        Scraper::new(config, dir, MetricSink::new().unwrap())
    }

    fn monitor() -> MemoryServer {
        MemoryServer::new().with_entry(
            Entry::new("cn=Total,cn=Connections,cn=Monitor")
                .with_attr("objectClass", "monitorCounterObject")
                .with_attr("monitorCounter", "3"),
        )
    }

    fn addr() -> DirectoryAddress {
        DirectoryAddress::new(Transport::Tcp, "ldap:389")
    }

    #[test]
    fn test_config_defaults() {
        let config = ScraperConfig::new(addr());
        assert_eq!(config.interval, DEFAULT_INTERVAL);
        assert!(config.primary.is_none());
        assert!(!config.credentials.should_bind());
    }

    #[test]
    fn test_config_interval_minimum() {
        let config = ScraperConfig::new(addr()).with_interval(Duration::from_millis(100));
        assert_eq!(config.interval, MIN_INTERVAL);
    }

    #[test]
    fn test_catalog_built_from_config() {
        let config = ScraperConfig::new(addr())
            .with_replication_objects(["dc=example,dc=com", "dc=example,dc=com"]);
        let scraper = memory_scraper(MemoryDirectory::new(), config);

        assert_eq!(scraper.catalog().len(), 4);
        assert_eq!(scraper.catalog().replication_count(), 1);
        assert_eq!(scraper.state(), ScraperState::Idle);
    }

    #[tokio::test]
    async fn test_run_once_success() {
        let dir = MemoryDirectory::new().with_server("ldap:389", monitor());
        let mut scraper = memory_scraper(dir.clone(), ScraperConfig::new(addr()));

        assert_eq!(scraper.run_once().await, ScrapeOutcome::Ok);
        assert_eq!(scraper.state(), ScraperState::Idle);
        assert_eq!(
            scraper
                .sink()
                .entry_value(EntryGauge::CounterObject, "cn=Total,cn=Connections,cn=Monitor"),
            Some(3.0)
        );
        assert_eq!(dir.stats().opened, dir.stats().closed);
    }

    #[tokio::test]
    async fn test_run_once_dial_failure() {
        let mut scraper = memory_scraper(MemoryDirectory::new(), ScraperConfig::new(addr()));

        assert_eq!(scraper.run_once().await, ScrapeOutcome::Fail);
        assert_eq!(scraper.sink().scrape_count(ScrapeOutcome::Fail), 1);
        assert_eq!(scraper.sink().scrape_count(ScrapeOutcome::Ok), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stops_on_cancel() {
        let dir = MemoryDirectory::new().with_server("ldap:389", monitor());
        let config = ScraperConfig::new(addr()).with_interval(Duration::from_secs(1));
        let scraper = memory_scraper(dir, config);
        let sink = scraper.sink().clone();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scraper.start(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(sink.scrape_count(ScrapeOutcome::Ok), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_observable_after_stop() {
        let dir = MemoryDirectory::new().with_server("ldap:389", monitor());
        let config = ScraperConfig::new(addr()).with_interval(Duration::from_secs(1));
        let scraper = memory_scraper(dir, config);
        let mut state = scraper.subscribe();
        assert_eq!(*state.borrow_and_update(), ScraperState::Idle);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scraper.start(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(*state.borrow(), ScraperState::Idle);
        assert!(state.has_changed().unwrap());

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(*state.borrow(), ScraperState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_tick_runs_nothing() {
        let dir = MemoryDirectory::new().with_server("ldap:389", monitor());
        let scraper = memory_scraper(dir.clone(), ScraperConfig::new(addr()));
        let sink = scraper.sink().clone();

        let cancel = CancellationToken::new();
        cancel.cancel();
        scraper.start(cancel).await;

        assert_eq!(sink.scrape_count(ScrapeOutcome::Ok), 0);
        assert_eq!(dir.stats().opened, 0);
    }
}
