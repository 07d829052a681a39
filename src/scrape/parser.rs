//! Attribute value parsing.
//!
//! Two strategies are supported:
//!
//! - **Plain**: the attribute holds a number, published per entry DN.
//! - **Replication token**: the attribute holds a `contextCSN` style token
//!   `<generalized time>#<count>#<server id>#<modifier>`, decomposed into one
//!   point per field, keyed by the server id.
//!
//! Token fields are published as soon as they decode, so a token whose count
//! is garbage still yields its timestamp point.

use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;
use thiserror::Error;

use crate::directory::Entry;
use crate::metrics::{EntryGauge, MetricSink, ReplicationKind};

/// Separator between replication token fields.
pub const TOKEN_SEPARATOR: char = '#';

/// Number of fields in a replication token.
pub const TOKEN_FIELDS: usize = 4;

/// Errors decoding a replication token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Wrong number of `#`-separated fields.
    #[error("expected 4 '#'-separated fields, found {0}")]
    FieldCount(usize),

    /// First field is not a generalized time.
    #[error("unexpected gt value '{0}'")]
    Timestamp(String),

    /// Second field is not a number.
    #[error("unexpected count value '{0}'")]
    Count(String),

    /// Fourth field is not a number.
    #[error("unexpected mod value '{0}'")]
    Modifier(String),
}

/// A fully decoded replication token.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationToken {
    /// Timestamp in whole epoch seconds.
    pub time: f64,
    pub count: f64,
    pub server_id: String,
    pub modifier: f64,
}

impl std::str::FromStr for ReplicationToken {
    type Err = TokenError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let fields = TokenFields::split(raw)?;
        Ok(Self {
            time: fields.time()?,
            count: fields.count()?,
            server_id: fields.server_id.to_string(),
            modifier: fields.modifier()?,
        })
    }
}

/// The raw fields of a token, decoded one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenFields<'a> {
    pub time: &'a str,
    pub count: &'a str,
    /// Used verbatim as a label, never validated.
    pub server_id: &'a str,
    pub modifier: &'a str,
}

impl<'a> TokenFields<'a> {
    /// Split a raw token into its four fields.
    pub fn split(raw: &'a str) -> Result<Self, TokenError> {
        let parts: Vec<&str> = raw.split(TOKEN_SEPARATOR).collect();
        match *parts.as_slice() {
            [time, count, server_id, modifier] => Ok(Self {
                time,
                count,
                server_id,
                modifier,
            }),
            _ => Err(TokenError::FieldCount(parts.len())),
        }
    }

    pub fn time(&self) -> Result<f64, TokenError> {
        parse_generalized_time(self.time).ok_or_else(|| TokenError::Timestamp(self.time.to_string()))
    }

    pub fn count(&self) -> Result<f64, TokenError> {
        parse_number(self.count).ok_or_else(|| TokenError::Count(self.count.to_string()))
    }

    pub fn modifier(&self) -> Result<f64, TokenError> {
        parse_number(self.modifier).ok_or_else(|| TokenError::Modifier(self.modifier.to_string()))
    }
}

/// Parse a generalized time (`YYYYMMDDhhmmss[.ffffff]Z`) into epoch seconds.
///
/// Fractional seconds are accepted but truncated.
pub fn parse_generalized_time(value: &str) -> Option<f64> {
    static GENERALIZED_TIME: OnceLock<Regex> = OnceLock::new();

    let regex = GENERALIZED_TIME.get_or_init(|| {
        Regex::new(r"^([0-9]{14})(?:\.[0-9]+)?Z$").expect("failed to compile generalized time regex")
    });

    let caps = regex.captures(value)?;
    let naive = NaiveDateTime::parse_from_str(&caps[1], "%Y%m%d%H%M%S").ok()?;
    Some(naive.and_utc().timestamp() as f64)
}

/// Parse a numeric attribute value.
pub fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok()
}

/// Publish the numeric value of `attribute` for every entry, keyed by DN.
///
/// Entries missing the attribute or holding a non-numeric value are skipped
/// silently.
/// Returns the number of points written.
pub fn set_plain_values(
    entries: &[Entry],
    attribute: &str,
    gauge: EntryGauge,
    sink: &MetricSink,
) -> usize {
    let mut written = 0;
    for entry in entries {
        let Some(value) = entry.attr(attribute).and_then(parse_number) else {
            continue;
        };
        sink.set_entry(gauge, &entry.dn, value);
        written += 1;
    }
    written
}

/// Decode the replication token of every entry and publish its fields.
///
/// Malformed tokens are logged with the query context and abandoned at the
/// first bad field; fields decoded before it stay published. Returns the
/// last timestamp decoded, if any.
pub fn set_replication_values(
    entries: &[Entry],
    filter: &str,
    attribute: &str,
    sink: &MetricSink,
) -> Option<f64> {
    let mut last_time = None;

    for entry in entries {
        let Some(raw) = entry.attr(attribute) else {
            continue;
        };

        if let Err(e) = publish_token(raw, sink, &mut last_time) {
            tracing::warn!(
                filter = %filter,
                attr = %attribute,
                value = %raw,
                error = %e,
                "Unexpected replication token"
            );
        }
    }

    last_time
}

fn publish_token(
    raw: &str,
    sink: &MetricSink,
    last_time: &mut Option<f64>,
) -> Result<(), TokenError> {
    let fields = TokenFields::split(raw)?;
    let sid = fields.server_id;

    let time = fields.time()?;
    *last_time = Some(time);
    sink.set_replication(sid, ReplicationKind::Time, time);

    sink.set_replication(sid, ReplicationKind::Count, fields.count()?);
    sink.set_replication(sid, ReplicationKind::Modifier, fields.modifier()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_subscriber::layer::{Context, SubscriberExt};

    const ATTR: &str = "contextCSN";
    const FILTER: &str = "(objectClass=*)";
    /// 2021-10-01T12:00:00Z
    const EPOCH: f64 = 1_633_089_600.0;

    fn token_entry(dn: &str, token: &str) -> Entry {
        Entry::new(dn).with_attr(ATTR, token)
    }

    /// Counts WARN events.
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn count_warnings(f: impl FnOnce()) -> usize {
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
        tracing::subscriber::with_default(subscriber, f);
        warnings.load(Ordering::SeqCst)
    }

    #[test]
    fn test_decode_token_with_fraction() {
        let token: ReplicationToken = "20211001120000.123456Z#5#node1#2".parse().unwrap();
        assert_eq!(
            token,
            ReplicationToken {
                time: EPOCH,
                count: 5.0,
                server_id: "node1".to_string(),
                modifier: 2.0,
            }
        );
    }

    #[test]
    fn test_decode_openldap_csn() {
        let token: ReplicationToken = "20240315083000.000000Z#000000#001#000000".parse().unwrap();
        assert_eq!(token.time, 1_710_491_400.0);
        assert_eq!(token.count, 0.0);
        assert_eq!(token.server_id, "001");
        assert_eq!(token.modifier, 0.0);
    }

    #[test]
    fn test_decode_token_errors() {
        assert_eq!(
            "20211001120000Z#abc#node1#2".parse::<ReplicationToken>(),
            Err(TokenError::Count("abc".to_string()))
        );
        assert_eq!(
            "20211001120000Z#1#node1#x".parse::<ReplicationToken>(),
            Err(TokenError::Modifier("x".to_string()))
        );
        assert_eq!(
            "yesterday#1#node1#2".parse::<ReplicationToken>(),
            Err(TokenError::Timestamp("yesterday".to_string()))
        );
        assert_eq!(
            "20211001120000Z#1#node1".parse::<ReplicationToken>(),
            Err(TokenError::FieldCount(3))
        );
        assert_eq!(
            "20211001120000Z#1#node1#2#9".parse::<ReplicationToken>(),
            Err(TokenError::FieldCount(5))
        );
    }

    #[test]
    fn test_generalized_time_format() {
        assert_eq!(parse_generalized_time("20211001120000Z"), Some(EPOCH));
        assert_eq!(parse_generalized_time("20211001120000.5Z"), Some(EPOCH));
        assert_eq!(parse_generalized_time("20211001120000.999999Z"), Some(EPOCH));
        // missing zone designator
        assert_eq!(parse_generalized_time("20211001120000"), None);
        assert_eq!(parse_generalized_time("20211001120000.1234567Z"), Some(EPOCH));
        assert_eq!(parse_generalized_time("20211001120000.Z"), None);
        // non-ASCII digits
        assert_eq!(parse_generalized_time("２0211001120000Z"), None);
        // not a calendar date
        assert_eq!(parse_generalized_time("20211301120000Z"), None);
        assert_eq!(parse_generalized_time("2021100112000Z"), None);
    }

    #[test]
    fn test_plain_values_skip_missing_and_non_numeric() {
        let sink = MetricSink::new().unwrap();
        let entries = vec![
            Entry::new("cn=Total,cn=Connections,cn=Monitor").with_attr("monitorCounter", "17"),
            Entry::new("cn=Connections,cn=Monitor"),
            Entry::new("cn=Uptime,cn=Time,cn=Monitor").with_attr("monitorCounter", "n/a"),
        ];

        let written = set_plain_values(&entries, "monitorCounter", EntryGauge::CounterObject, &sink);

        assert_eq!(written, 1);
        assert_eq!(
            sink.entry_value(EntryGauge::CounterObject, "cn=Total,cn=Connections,cn=Monitor"),
            Some(17.0)
        );
        assert_eq!(
            sink.entry_value(EntryGauge::CounterObject, "cn=Connections,cn=Monitor"),
            None
        );
        assert_eq!(
            sink.entry_value(EntryGauge::CounterObject, "cn=Uptime,cn=Time,cn=Monitor"),
            None
        );
    }

    #[test]
    fn test_replication_values_full_token() {
        let sink = MetricSink::new().unwrap();
        let entries = vec![token_entry("dc=example,dc=com", "20211001120000.123456Z#5#node1#2")];

        let last = set_replication_values(&entries, FILTER, ATTR, &sink);

        assert_eq!(last, Some(EPOCH));
        assert_eq!(sink.replication_value("node1", ReplicationKind::Time), Some(EPOCH));
        assert_eq!(sink.replication_value("node1", ReplicationKind::Count), Some(5.0));
        assert_eq!(sink.replication_value("node1", ReplicationKind::Modifier), Some(2.0));
    }

    #[test]
    fn test_replication_values_bad_count_keeps_timestamp() {
        let sink = MetricSink::new().unwrap();
        let entries = vec![token_entry("dc=example,dc=com", "20211001120000Z#abc#node1#2")];

        let last = set_replication_values(&entries, FILTER, ATTR, &sink);

        assert_eq!(last, Some(EPOCH));
        assert_eq!(sink.replication_value("node1", ReplicationKind::Time), Some(EPOCH));
        assert_eq!(sink.replication_value("node1", ReplicationKind::Count), None);
        assert_eq!(sink.replication_value("node1", ReplicationKind::Modifier), None);
    }

    #[test]
    fn test_replication_values_bad_modifier_keeps_time_and_count() {
        let sink = MetricSink::new().unwrap();
        let entries = vec![token_entry("dc=example,dc=com", "20211001120000Z#3#node2#zz")];

        set_replication_values(&entries, FILTER, ATTR, &sink);

        assert_eq!(sink.replication_value("node2", ReplicationKind::Time), Some(EPOCH));
        assert_eq!(sink.replication_value("node2", ReplicationKind::Count), Some(3.0));
        assert_eq!(sink.replication_value("node2", ReplicationKind::Modifier), None);
    }

    #[test]
    fn test_replication_values_bad_timestamp_publishes_nothing() {
        let sink = MetricSink::new().unwrap();
        let entries = vec![token_entry("dc=example,dc=com", "2021-10-01#5#node1#2")];

        let last = set_replication_values(&entries, FILTER, ATTR, &sink);

        assert_eq!(last, None);
        for kind in [
            ReplicationKind::Time,
            ReplicationKind::Count,
            ReplicationKind::Modifier,
        ] {
            assert_eq!(sink.replication_value("node1", kind), None);
        }
    }

    #[test]
    fn test_replication_values_missing_attribute_and_multiple_entries() {
        let sink = MetricSink::new().unwrap();
        let entries = vec![
            Entry::new("ou=people,dc=example,dc=com"),
            token_entry("dc=example,dc=com", "20211001120000Z#1#001#0"),
            token_entry("dc=example,dc=com", "20211001120010Z#2#002#0"),
        ];

        let last = set_replication_values(&entries, FILTER, ATTR, &sink);

        assert_eq!(last, Some(EPOCH + 10.0));
        assert_eq!(sink.replication_value("001", ReplicationKind::Time), Some(EPOCH));
        assert_eq!(sink.replication_value("002", ReplicationKind::Time), Some(EPOCH + 10.0));
    }

    #[test]
    fn test_bad_count_logs_one_warning() {
        let sink = MetricSink::new().unwrap();
        let entries = vec![token_entry("dc=example,dc=com", "20211001120000Z#abc#node1#2")];

        let warnings = count_warnings(|| {
            set_replication_values(&entries, FILTER, ATTR, &sink);
        });

        assert_eq!(warnings, 1);
    }

    #[test]
    fn test_bad_timestamp_logs_one_warning() {
        let sink = MetricSink::new().unwrap();
        let entries = vec![token_entry("dc=example,dc=com", "yesterday#5#node1#2")];

        let warnings = count_warnings(|| {
            set_replication_values(&entries, FILTER, ATTR, &sink);
        });

        assert_eq!(warnings, 1);
    }

    #[test]
    fn test_missing_token_attribute_is_silent() {
        let sink = MetricSink::new().unwrap();
        let entries = vec![Entry::new("dc=example,dc=com").with_attr("objectClass", "dcObject")];

        let warnings = count_warnings(|| {
            assert_eq!(set_replication_values(&entries, FILTER, ATTR, &sink), None);
        });

        assert_eq!(warnings, 0);
    }

    #[test]
    fn test_missing_or_non_numeric_plain_value_is_silent() {
        let sink = MetricSink::new().unwrap();
        let entries = vec![
            Entry::new("cn=Connections,cn=Monitor"),
            Entry::new("cn=Backend,cn=Monitor").with_attr("monitorCounter", "not-a-number"),
        ];

        let warnings = count_warnings(|| {
            set_plain_values(&entries, "monitorCounter", EntryGauge::CounterObject, &sink);
        });

        assert_eq!(warnings, 0);
    }
}
