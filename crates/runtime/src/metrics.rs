use std::collections::BTreeMap;

use serde::Serialize;
use streaming::SourceKind;

/// What happened to one attempted remote fetch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Issued,
    /// Key unchanged and the refresh interval has not elapsed.
    Fresh,
    /// Same key already outstanding.
    InFlight,
    Applied,
    Failed,
    /// Arrived after a newer fetch or after teardown.
    Stale,
}

impl FetchOutcome {
    fn as_str(self) -> &'static str {
        match self {
            FetchOutcome::Issued => "issued",
            FetchOutcome::Fresh => "suppressed_fresh",
            FetchOutcome::InFlight => "suppressed_in_flight",
            FetchOutcome::Applied => "applied",
            FetchOutcome::Failed => "failed",
            FetchOutcome::Stale => "stale",
        }
    }
}

/// Engine counters and gauges.
///
/// Sorted maps keep snapshots stable, so they can be diffed between passes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Metrics {
    counters: BTreeMap<String, u64>,
    gauges: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: Vec<(String, u64)>,
    pub gauges: Vec<(String, i64)>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn inc_counter(&mut self, name: impl Into<String>, by: u64) {
        *self.counters.entry(name.into()).or_insert(0) += by;
    }

    pub fn gauge(&self, name: &str) -> Option<i64> {
        self.gauges.get(name).copied()
    }

    pub fn set_gauge(&mut self, name: impl Into<String>, value: i64) {
        self.gauges.insert(name.into(), value);
    }

    pub fn record_fetch(&mut self, source: SourceKind, outcome: FetchOutcome) {
        self.inc_counter(fetch_counter(source, outcome), 1);
    }

    pub fn fetches(&self, source: SourceKind, outcome: FetchOutcome) -> u64 {
        self.counter(&fetch_counter(source, outcome))
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            gauges: self.gauges.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }
}

fn fetch_counter(source: SourceKind, outcome: FetchOutcome) -> String {
    format!("fetch.{source}.{}", outcome.as_str())
}

#[cfg(test)]
mod tests {
    use super::{FetchOutcome, Metrics};
    use streaming::SourceKind;

    #[test]
    fn fetch_counters_are_per_source() {
        let mut m = Metrics::new();
        m.record_fetch(SourceKind::Tracks, FetchOutcome::Issued);
        m.record_fetch(SourceKind::Tracks, FetchOutcome::Issued);
        m.record_fetch(SourceKind::Photos, FetchOutcome::Stale);
        assert_eq!(m.fetches(SourceKind::Tracks, FetchOutcome::Issued), 2);
        assert_eq!(m.fetches(SourceKind::Photos, FetchOutcome::Issued), 0);
        assert_eq!(m.counter("fetch.photos.stale"), 1);
    }

    #[test]
    fn gauges_overwrite() {
        let mut m = Metrics::new();
        assert_eq!(m.gauge("markers"), None);
        m.set_gauge("markers", 3);
        m.set_gauge("markers", 2);
        assert_eq!(m.gauge("markers"), Some(2));
    }

    #[test]
    fn snapshot_is_stably_sorted() {
        let mut m = Metrics::new();
        m.inc_counter("b", 1);
        m.inc_counter("a", 1);
        m.set_gauge("z", 1);
        m.set_gauge("m", 2);

        let snap = m.snapshot();
        assert_eq!(snap.counters, vec![("a".to_string(), 1), ("b".to_string(), 1)]);
        assert_eq!(snap.gauges, vec![("m".to_string(), 2), ("z".to_string(), 1)]);
    }
}
