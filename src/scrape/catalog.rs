//! Query catalog.
//!
//! The fixed monitoring queries plus one replication query per configured
//! peer base DN. The catalog is built once per scraper and never grows
//! afterwards.

use std::collections::HashSet;

use crate::directory::Entry;
use crate::metrics::{EntryGauge, MetricSink};

use super::parser::{set_plain_values, set_replication_values};

/// Root of the monitoring subtree.
pub const MONITOR_BASE_DN: &str = "cn=Monitor";
/// Operation counters below the monitoring subtree.
pub const OPERATIONS_BASE_DN: &str = "cn=Operations,cn=Monitor";

pub const MONITORED_OBJECT: &str = "monitoredObject";
pub const MONITORED_INFO: &str = "monitoredInfo";
pub const MONITOR_COUNTER_OBJECT: &str = "monitorCounterObject";
pub const MONITOR_COUNTER: &str = "monitorCounter";
pub const MONITOR_OPERATION: &str = "monitorOperation";
pub const MONITOR_OP_COMPLETED: &str = "monitorOpCompleted";
/// Attribute holding the replication token of a naming context.
pub const CONTEXT_CSN: &str = "contextCSN";

/// Build an `(objectClass=...)` filter.
pub fn object_class(name: &str) -> String {
    format!("(objectClass={name})")
}

/// How search results of a query are turned into points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Numeric attribute published on an entry gauge.
    Plain(EntryGauge),
    /// Replication token published on the replication gauge.
    ReplicationToken,
}

/// One monitoring query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub base_dn: String,
    pub filter: String,
    pub attribute: String,
    pub kind: QueryKind,
    last_local_time: Option<f64>,
}

impl QueryDescriptor {
    /// A query whose attribute is a plain number.
    pub fn plain(
        base_dn: impl Into<String>,
        filter: impl Into<String>,
        attribute: impl Into<String>,
        gauge: EntryGauge,
    ) -> Self {
        Self {
            base_dn: base_dn.into(),
            filter: filter.into(),
            attribute: attribute.into(),
            kind: QueryKind::Plain(gauge),
            last_local_time: None,
        }
    }

    /// A replication-token query for the naming context at `base_dn`.
    pub fn replication(base_dn: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            filter: object_class("*"),
            attribute: CONTEXT_CSN.to_string(),
            kind: QueryKind::ReplicationToken,
            last_local_time: None,
        }
    }

    pub fn is_replication(&self) -> bool {
        self.kind == QueryKind::ReplicationToken
    }

    /// Timestamp of the most recent local token this query decoded.
    pub fn last_local_time(&self) -> Option<f64> {
        self.last_local_time
    }

    /// Publish the search results of this query.
    pub fn apply(&mut self, entries: &[Entry], sink: &MetricSink) {
        match self.kind {
            QueryKind::Plain(gauge) => {
                set_plain_values(entries, &self.attribute, gauge, sink);
            }
            QueryKind::ReplicationToken => {
                if let Some(time) =
                    set_replication_values(entries, &self.filter, &self.attribute, sink)
                {
                    self.last_local_time = Some(time);
                }
            }
        }
    }
}

/// Ordered, append-free collection of queries.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCatalog {
    queries: Vec<QueryDescriptor>,
}

impl QueryCatalog {
    /// Build the catalog: standard queries first, then one replication query
    /// per distinct peer base DN in the given order.
    pub fn new<S: AsRef<str>>(replication_objects: &[S]) -> Self {
        let mut queries = Self::standard_queries();
        let mut seen = HashSet::new();

        for base_dn in replication_objects {
            let base_dn = base_dn.as_ref().trim();
            if base_dn.is_empty() || !seen.insert(base_dn.to_lowercase()) {
                tracing::debug!(base_dn = %base_dn, "Skipping empty or duplicate replication object");
                continue;
            }
            queries.push(QueryDescriptor::replication(base_dn));
        }

        Self { queries }
    }

    /// The monitoring queries every deployment runs.
    pub fn standard_queries() -> Vec<QueryDescriptor> {
        vec![
            QueryDescriptor::plain(
                MONITOR_BASE_DN,
                object_class(MONITORED_OBJECT),
                MONITORED_INFO,
                EntryGauge::MonitoredObject,
            ),
            QueryDescriptor::plain(
                MONITOR_BASE_DN,
                object_class(MONITOR_COUNTER_OBJECT),
                MONITOR_COUNTER,
                EntryGauge::CounterObject,
            ),
            QueryDescriptor::plain(
                OPERATIONS_BASE_DN,
                object_class(MONITOR_OPERATION),
                MONITOR_OP_COMPLETED,
                EntryGauge::Operation,
            ),
        ]
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn replication_count(&self) -> usize {
        self.queries.iter().filter(|q| q.is_replication()).count()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QueryDescriptor> {
        self.queries.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, QueryDescriptor> {
        self.queries.iter_mut()
    }
}
