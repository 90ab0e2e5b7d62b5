//! Tagged counters, gauges and events.
//!
//! [`Stats`] is a cheap cloneable handle that carries a metric name prefix and a
//! tag set; the actual backend is a [`StatsSink`].

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use tracing::{debug, info};

pub type Tags = BTreeMap<String, String>;

/// Build a tag map from key/value pairs.
pub fn tags<I, K, V>(pairs: I) -> Tags
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: ToString,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.to_string())).collect()
}

pub trait StatsSink: Send + Sync {
    fn count(&self, name: &str, value: i64, tags: &Tags);
    fn gauge(&self, name: &str, value: f64, tags: &Tags);
    fn event(&self, title: &str, text: &str, tags: &Tags);
}

#[derive(Clone)]
pub struct Stats {
    sink: Arc<dyn StatsSink>,
    prefix: String,
    tags: Tags,
}

impl std::fmt::Debug for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stats").field("prefix", &self.prefix).field("tags", &self.tags).finish()
    }
}

impl Stats {
    pub fn new(sink: Arc<dyn StatsSink>) -> Self {
        Self {
            sink,
            prefix: String::new(),
            tags: Tags::new(),
        }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopStats))
    }

    /// Append a dotted segment to the metric prefix.
    pub fn with_prefix(&self, prefix: &str) -> Self {
        let mut next = self.clone();
        next.prefix = self.qualify(prefix);
        next
    }

    /// Merge tags; later values win.
    pub fn with_tags(&self, extra: Tags) -> Self {
        let mut next = self.clone();
        next.tags.extend(extra);
        next
    }

    pub fn with_tag(&self, key: &str, value: impl ToString) -> Self {
        self.with_tags(tags([(key, value)]))
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn count(&self, name: &str, value: i64) {
        self.sink.count(&self.qualify(name), value, &self.tags);
    }

    pub fn incr(&self, name: &str) {
        self.count(name, 1);
    }

    pub fn gauge(&self, name: &str, value: f64) {
        self.sink.gauge(&self.qualify(name), value, &self.tags);
    }

    pub fn event(&self, title: &str, text: &str, extra: &Tags) {
        let mut merged = self.tags.clone();
        merged.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.sink.event(title, text, &merged);
    }

    fn qualify(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }
}

/// Discards everything.
pub struct NoopStats;

impl StatsSink for NoopStats {
    fn count(&self, _name: &str, _value: i64, _tags: &Tags) {}
    fn gauge(&self, _name: &str, _value: f64, _tags: &Tags) {}
    fn event(&self, _title: &str, _text: &str, _tags: &Tags) {}
}

/// Emits metrics as tracing events under the `stats` target.
pub struct TracingStats;

impl StatsSink for TracingStats {
    fn count(&self, name: &str, value: i64, tags: &Tags) {
        debug!(target: "stats", metric = name, value, ?tags, "count");
    }

    fn gauge(&self, name: &str, value: f64, tags: &Tags) {
        debug!(target: "stats", metric = name, value, ?tags, "gauge");
    }

    fn event(&self, title: &str, text: &str, tags: &Tags) {
        info!(target: "stats", title, text, ?tags, "event");
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatRecord {
    Count { name: String, value: i64, tags: Tags },
    Gauge { name: String, value: f64, tags: Tags },
    Event { title: String, text: String, tags: Tags },
}

/// Keeps every record in memory.
#[derive(Default)]
pub struct MemoryStats {
    records: Mutex<Vec<StatRecord>>,
}

impl MemoryStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<StatRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Sum of all counts recorded under `name`.
    pub fn total(&self, name: &str) -> i64 {
        self.records()
            .iter()
            .filter_map(|r| match r {
                StatRecord::Count { name: n, value, .. } if n == name => Some(*value),
                _ => None,
            })
            .sum()
    }

    pub fn last_gauge(&self, name: &str) -> Option<f64> {
        self.records().iter().rev().find_map(|r| match r {
            StatRecord::Gauge { name: n, value, .. } if n == name => Some(*value),
            _ => None,
        })
    }

    pub fn events(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                StatRecord::Event { title, .. } => Some(title),
                _ => None,
            })
            .collect()
    }

    fn push(&self, record: StatRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

impl StatsSink for MemoryStats {
    fn count(&self, name: &str, value: i64, tags: &Tags) {
        self.push(StatRecord::Count {
            name: name.to_string(),
            value,
            tags: tags.clone(),
        });
    }

    fn gauge(&self, name: &str, value: f64, tags: &Tags) {
        self.push(StatRecord::Gauge {
            name: name.to_string(),
            value,
            tags: tags.clone(),
        });
    }

    fn event(&self, title: &str, text: &str, tags: &Tags) {
        self.push(StatRecord::Event {
            title: title.to_string(),
            text: text.to_string(),
            tags: tags.clone(),
        });
    }
}
