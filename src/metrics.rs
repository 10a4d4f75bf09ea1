//! Run statistics
//!
//! Stages never fail a record for a recovered error; they count it instead.
//! Counters are grouped by stage namespace (`thesesfr`, `thesesfr-personne`,
//! ...) and reported at the end of a run.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Counters maintained by the enrichment stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Counter {
    /// Remote request attempts
    Queries,
    /// Failed remote request attempts
    QueryFails,
    /// Successful responses with an empty text payload
    QueryEmptyResponses,
    /// Cache write failures
    CacheFails,
    /// Cache read failures (treated as misses)
    CacheReadFails,
    /// Records enriched from the cache
    CacheHits,
    /// Records skipped because the cache holds the empty marker
    CacheNegatives,
    /// Records enriched from a remote lookup
    Enriched,
    /// Records the remote service had no document for
    NotFound,
    /// Packets abandoned after exhausting retries
    PacketsFailed,
}

impl Counter {
    pub const ALL: [Counter; 10] = [
        Counter::Queries,
        Counter::QueryFails,
        Counter::QueryEmptyResponses,
        Counter::CacheFails,
        Counter::CacheReadFails,
        Counter::CacheHits,
        Counter::CacheNegatives,
        Counter::Enriched,
        Counter::NotFound,
        Counter::PacketsFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Counter::Queries => "queries",
            Counter::QueryFails => "query-fails",
            Counter::QueryEmptyResponses => "query-empty-responses",
            Counter::CacheFails => "cache-fails",
            Counter::CacheReadFails => "cache-read-fails",
            Counter::CacheHits => "cache-hits",
            Counter::CacheNegatives => "cache-negatives",
            Counter::Enriched => "enriched",
            Counter::NotFound => "not-found",
            Counter::PacketsFailed => "packets-failed",
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for stage counters
pub trait MetricsSink: Send + Sync {
    /// Reset a counter to zero (stage start-up)
    fn reset(&self, namespace: &str, counter: Counter);

    /// Increment a counter by one
    fn increment(&self, namespace: &str, counter: Counter);

    /// Current value of a counter
    fn get(&self, namespace: &str, counter: Counter) -> u64;
}

/// In-process report of every stage's counters
#[derive(Debug, Default)]
pub struct RunReport {
    counters: DashMap<(String, Counter), u64>,
}

/// Serializable copy of a report: namespace -> counter -> value
pub type ReportSnapshot = BTreeMap<String, BTreeMap<&'static str, u64>>;

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the counters for printing
    pub fn snapshot(&self) -> ReportSnapshot {
        let mut snapshot = ReportSnapshot::new();
        for entry in self.counters.iter() {
            let (namespace, counter) = entry.key();
            snapshot
                .entry(namespace.clone())
                .or_default()
                .insert(counter.as_str(), *entry.value());
        }
        snapshot
    }
}

impl MetricsSink for RunReport {
    fn reset(&self, namespace: &str, counter: Counter) {
        self.counters.insert((namespace.to_string(), counter), 0);
    }

    fn increment(&self, namespace: &str, counter: Counter) {
        *self
            .counters
            .entry((namespace.to_string(), counter))
            .or_insert(0) += 1;
    }

    fn get(&self, namespace: &str, counter: Counter) -> u64 {
        self.counters
            .get(&(namespace.to_string(), counter))
            .map(|v| *v)
            .unwrap_or(0)
    }
}
