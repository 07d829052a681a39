//! Metric sink backed by an explicit Prometheus registry.
//!
//! All gauges are last-write-wins. Series are never expired: a DN that
//! disappears from the directory keeps its last value until restart.

use prometheus::core::Collector;
use prometheus::proto::Metric;
use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Subsystem prefix of every exported metric.
pub const SUBSYSTEM: &str = "openldap";

/// Errors raised while registering or encoding metrics.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Registration or encoding failed.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// Encoded exposition was not valid UTF-8.
    #[error("invalid exposition output: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Gauges labeled by entry DN.
///
/// The string form is the metric name without the subsystem prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
pub enum EntryGauge {
    /// `monitoredInfo` of `monitoredObject` entries.
    #[strum(serialize = "monitored_object")]
    MonitoredObject,
    /// `monitorCounter` of `monitorCounterObject` entries.
    #[strum(serialize = "monitor_counter_object")]
    CounterObject,
    /// `monitorOpCompleted` of `monitorOperation` entries.
    #[strum(serialize = "monitor_operation")]
    Operation,
}

/// Measurement kinds of the replication gauge (`type` label).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ReplicationKind {
    /// Token timestamp in epoch seconds.
    #[strum(serialize = "gt")]
    Time,
    /// Change sequence count.
    Count,
    /// Modifier id.
    #[strum(serialize = "mod")]
    Modifier,
    /// Primary timestamp minus local timestamp.
    Delay,
}

/// Overall result of one scrape cycle (`result` label).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ScrapeOutcome {
    Ok,
    Fail,
}

impl ScrapeOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<bool> for ScrapeOutcome {
    fn from(ok: bool) -> Self {
        if ok { Self::Ok } else { Self::Fail }
    }
}

/// Labeled gauges and the scrape counter.
///
/// Cloning is cheap and every clone writes to the same series.
#[derive(Clone)]
pub struct MetricSink {
    registry: Registry,
    monitored_object: GaugeVec,
    counter_object: GaugeVec,
    operation: GaugeVec,
    replication: GaugeVec,
    scrape: IntCounterVec,
}

impl MetricSink {
    /// Create a sink registered on a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        Self::with_registry(Registry::new())
    }

    /// Create a sink and register its metrics on `registry`.
    ///
    /// # Errors
    /// Fails with `AlreadyReg` if the registry already carries these metrics,
    /// so each registry can back at most one sink.
    pub fn with_registry(registry: Registry) -> Result<Self, MetricsError> {
        let monitored_object = gauge_vec(
            EntryGauge::MonitoredObject.as_ref(),
            "cn=Monitor (objectClass=monitoredObject) monitoredInfo",
            &["dn"],
        )?;
        let counter_object = gauge_vec(
            EntryGauge::CounterObject.as_ref(),
            "cn=Monitor (objectClass=monitorCounterObject) monitorCounter",
            &["dn"],
        )?;
        let operation = gauge_vec(
            EntryGauge::Operation.as_ref(),
            "cn=Operations,cn=Monitor (objectClass=monitorOperation) monitorOpCompleted",
            &["dn"],
        )?;
        let replication = gauge_vec(
            "monitor_replication",
            "cn=Monitor monitorReplication",
            &["id", "type"],
        )?;
        let scrape = IntCounterVec::new(
            Opts::new("scrape", "successful vs unsuccessful ldap scrape attempts")
                .subsystem(SUBSYSTEM),
            &["result"],
        )?;

        registry.register(Box::new(monitored_object.clone()))?;
        registry.register(Box::new(counter_object.clone()))?;
        registry.register(Box::new(operation.clone()))?;
        registry.register(Box::new(replication.clone()))?;
        registry.register(Box::new(scrape.clone()))?;

        Ok(Self {
            registry,
            monitored_object,
            counter_object,
            operation,
            replication,
            scrape,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Set the point labeled by `dn` on one of the entry gauges.
    pub fn set_entry(&self, gauge: EntryGauge, dn: &str, value: f64) {
        self.entry_vec(gauge).with_label_values(&[dn]).set(value);
    }

    /// Set the replication point for `(server_id, kind)`.
    pub fn set_replication(&self, server_id: &str, kind: ReplicationKind, value: f64) {
        self.replication
            .with_label_values(&[server_id, kind.as_ref()])
            .set(value);
    }

    /// Count one finished cycle.
    pub fn record_outcome(&self, outcome: ScrapeOutcome) {
        self.scrape.with_label_values(&[outcome.as_ref()]).inc();
    }

    /// Current value of an entry gauge point, if it was ever set.
    pub fn entry_value(&self, gauge: EntryGauge, dn: &str) -> Option<f64> {
        lookup(self.entry_vec(gauge), &[("dn", dn)], |m| {
            m.get_gauge().get_value()
        })
    }

    /// Current value of a replication point, if it was ever set.
    pub fn replication_value(&self, server_id: &str, kind: ReplicationKind) -> Option<f64> {
        lookup(
            &self.replication,
            &[("id", server_id), ("type", kind.as_ref())],
            |m| m.get_gauge().get_value(),
        )
    }

    /// Number of cycles recorded with `outcome`.
    pub fn scrape_count(&self, outcome: ScrapeOutcome) -> u64 {
        lookup(&self.scrape, &[("result", outcome.as_ref())], |m| {
            m.get_counter().get_value()
        })
        .map_or(0, |v| v as u64)
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    fn entry_vec(&self, gauge: EntryGauge) -> &GaugeVec {
        match gauge {
            EntryGauge::MonitoredObject => &self.monitored_object,
            EntryGauge::CounterObject => &self.counter_object,
            EntryGauge::Operation => &self.operation,
        }
    }
}

impl std::fmt::Debug for MetricSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSink")
            .field("families", &self.registry.gather().len())
            .finish_non_exhaustive()
    }
}

fn gauge_vec(name: &str, help: &str, labels: &[&str]) -> Result<GaugeVec, MetricsError> {
    Ok(GaugeVec::new(
        Opts::new(name, help).subsystem(SUBSYSTEM),
        labels,
    )?)
}

/// Read a series without creating it.
fn lookup<C: Collector>(
    collector: &C,
    labels: &[(&str, &str)],
    read: impl Fn(&Metric) -> f64,
) -> Option<f64> {
    collector
        .collect()
        .iter()
        .flat_map(|family| family.get_metric())
        .find(|metric| {
            let pairs = metric.get_label();
            pairs.len() == labels.len()
                && labels.iter().all(|(name, value)| {
                    pairs
                        .iter()
                        .any(|p| p.get_name() == *name && p.get_value() == *value)
                })
        })
        .map(read)
}
