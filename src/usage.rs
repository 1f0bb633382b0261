//! Per-key usage statistics and the adaptive TTL/priority rules derived
//! from them.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;

use crate::clock::elapsed;
use crate::entry::Priority;

/// Frequency above which fresh entries are cached twice as long.
const HOT_FREQUENCY: f64 = 10.0;
/// Frequency below which fresh entries are cached half as long.
const COLD_FREQUENCY: f64 = 1.0;

/// Access statistics for a single key.
#[derive(Debug, Clone, Serialize)]
pub struct UsagePattern {
    pub key: String,
    /// Accesses since the last analysis pass, or accesses per hour right
    /// after one.
    pub access_frequency: f64,
    /// Hour-of-day buckets (0..=23, UTC) in which the key was accessed.
    pub peak_usage_hours: BTreeSet<u8>,
    pub last_analyzed: DateTime<Utc>,
    /// Lifetime access count; never rebased.
    pub total_accesses: u64,
}

impl UsagePattern {
    fn new(key: &str, now: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            access_frequency: 0.0,
            peak_usage_hours: BTreeSet::new(),
            last_analyzed: now,
            total_accesses: 0,
        }
    }

    /// Rebase the raw counter into a per-hour rate. Windows shorter than an
    /// hour count as one hour so a quick re-analysis cannot inflate the rate.
    fn rebase(&mut self, now: DateTime<Utc>) {
        let hours = elapsed(self.last_analyzed, now).as_secs_f64() / 3600.0;
        self.access_frequency /= hours.max(1.0);
        self.last_analyzed = now;
    }
}

#[derive(Debug, Default)]
pub struct UsageTracker {
    patterns: HashMap<String, UsagePattern>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hit or a miss for `key`.
    pub fn record_access(&mut self, key: &str, now: DateTime<Utc>) {
        let pattern = self
            .patterns
            .entry(key.to_string())
            .or_insert_with(|| UsagePattern::new(key, now));
        pattern.access_frequency += 1.0;
        pattern.total_accesses += 1;
        pattern.peak_usage_hours.insert(now.hour() as u8);
    }

    /// Rebase every pattern to a per-hour rate.
    pub fn analyze(&mut self, now: DateTime<Utc>) {
        for pattern in self.patterns.values_mut() {
            pattern.rebase(now);
        }
    }

    pub fn pattern(&self, key: &str) -> Option<&UsagePattern> {
        self.patterns.get(key)
    }

    pub fn frequency(&self, key: &str) -> Option<f64> {
        self.patterns.get(key).map(|p| p.access_frequency)
    }

    /// Priority a live entry should carry, if the key has been observed.
    pub fn derived_priority(&self, key: &str) -> Option<Priority> {
        self.frequency(key).map(Priority::from_frequency)
    }

    /// TTL for a fresh write: the base TTL scaled by how hot the key is.
    pub fn adaptive_ttl(&self, key: &str, base: Duration) -> Duration {
        match self.frequency(key) {
            Some(f) if f > HOT_FREQUENCY => base.saturating_mul(2),
            Some(f) if f < COLD_FREQUENCY => base / 2,
            _ => base,
        }
    }

    /// Sum of lifetime accesses over keys matching `predicate`.
    pub fn total_accesses_where(&self, predicate: impl Fn(&str) -> bool) -> u64 {
        self.patterns
            .values()
            .filter(|p| predicate(&p.key))
            .map(|p| p.total_accesses)
            .sum()
    }

    pub fn average_frequency(&self) -> f64 {
        if self.patterns.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.patterns.values().map(|p| p.access_frequency).sum();
        sum / self.patterns.len() as f64
    }

    /// Keys ordered by descending frequency.
    pub fn hottest(&self, limit: usize) -> Vec<(String, f64)> {
        let mut keys: Vec<_> = self
            .patterns
            .values()
            .map(|p| (p.key.clone(), p.access_frequency))
            .collect();
        keys.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        keys.truncate(limit);
        keys
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn clear(&mut self) {
        self.patterns.clear();
    }
}
