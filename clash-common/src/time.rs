//! Wall-clock helpers and append-only timing logs
//!
//! The battle record carries a `timings` list of `(label, unix_seconds)`
//! pairs. Concurrent sections each append to their own log; the gateway
//! merges and sorts by timestamp before serialization so the stored order
//! is independent of task completion order.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall clock as fractional unix seconds.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Append-only `(label, timestamp)` log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timings(Vec<(String, f64)>);

impl Timings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a label stamped with the current wall clock.
    pub fn mark(&mut self, label: impl Into<String>) {
        self.0.push((label.into(), unix_now()));
    }

    /// Append a label at an explicit timestamp.
    pub fn mark_at(&mut self, label: impl Into<String>, at: f64) {
        self.0.push((label.into(), at));
    }

    /// Merge another log into this one.
    pub fn extend(&mut self, other: Timings) {
        self.0.extend(other.0);
    }

    /// Sort entries by timestamp. Ties keep insertion order.
    pub fn sort_by_time(&mut self) {
        self.0
            .sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(label, _)| label.as_str())
    }

    pub fn into_inner(self) -> Vec<(String, f64)> {
        self.0
    }
}

impl From<Vec<(String, f64)>> for Timings {
    fn from(entries: Vec<(String, f64)>) -> Self {
        Self(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_now_is_recent() {
        let now = unix_now();
        // Some time after 2020, some time before 2100.
        assert!(now > 1_577_836_800.0);
        assert!(now < 4_102_444_800.0);
    }

    #[test]
    fn test_mark_appends_in_order() {
        let mut t = Timings::new();
        t.mark("first");
        t.mark("second");
        let labels: Vec<&str> = t.labels().collect();
        assert_eq!(labels, vec!["first", "second"]);
    }

    #[test]
    fn test_sort_by_time_reorders() {
        let mut t = Timings::new();
        t.mark_at("late", 10.0);
        t.mark_at("early", 1.0);
        t.mark_at("middle", 5.0);
        t.sort_by_time();
        let labels: Vec<&str> = t.labels().collect();
        assert_eq!(labels, vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_serializes_as_pair_array() {
        let mut t = Timings::new();
        t.mark_at("parse", 1.5);
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json, serde_json::json!([["parse", 1.5]]));
        let back: Timings = serde_json::from_value(json).unwrap();
        assert_eq!(back, t);
    }
}
