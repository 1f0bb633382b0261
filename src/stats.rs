//! Statistics and metrics for the cache.
//!
//! Hot-path counters are atomics so reads never contend with the store.
//! [`PerformanceMetrics`] and [`CacheStats`] are plain snapshots derived from
//! those counters and the store on demand.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::Priority;

/// Atomic counters updated by every cache operation.
#[derive(Debug, Default)]
pub struct AccessCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    secondary_hits: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    sets: AtomicU64,
    evicting_sets: AtomicU64,
    invalidations: AtomicU64,
    deletes: AtomicU64,
    response_time_micros: AtomicU64,
}

impl AccessCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a served lookup and how long it took.
    pub fn record_hit(&self, elapsed: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.record_response_time(elapsed);
    }

    pub fn record_miss(&self, elapsed: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.record_response_time(elapsed);
    }

    /// A lookup served by the secondary tier. Also counted as a hit.
    pub fn record_secondary_hit(&self) {
        self.secondary_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a write; `evicted` marks writes that had to make room.
    pub fn record_set(&self, evicted: bool) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        if evicted {
            self.evicting_sets.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_invalidations(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_response_time(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.response_time_micros
            .fetch_add(micros, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn secondary_hits(&self) -> u64 {
        self.secondary_hits.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    pub fn evicting_sets(&self) -> u64 {
        self.evicting_sets.load(Ordering::Relaxed)
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Hit rate as a percentage (0.0 to 100.0); 0.0 before any request.
    pub fn hit_rate(&self) -> f64 {
        percentage(self.hits(), self.total_requests())
    }

    /// Mean lookup latency in milliseconds.
    pub fn average_response_time_ms(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        self.response_time_micros.load(Ordering::Relaxed) as f64 / total as f64 / 1000.0
    }

    /// Share of writes that triggered an eviction, as a percentage.
    pub fn eviction_rate(&self) -> f64 {
        percentage(self.evicting_sets(), self.sets())
    }

    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.secondary_hits,
            &self.evictions,
            &self.expirations,
            &self.sets,
            &self.evicting_sets,
            &self.invalidations,
            &self.deletes,
            &self.response_time_micros,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Aggregate performance of one cache instance at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Percentage of requests served from the cache.
    pub hit_rate: f64,
    pub miss_rate: f64,
    /// Milliseconds.
    pub average_response_time: f64,
    /// Estimated bytes held by live and not-yet-swept entries.
    pub memory_usage: u64,
    pub eviction_count: u64,
    /// Percentage of writes that triggered an eviction.
    pub eviction_rate: f64,
    pub total_requests: u64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub entry_count: usize,
    pub average_access_frequency: f64,
    pub last_updated: DateTime<Utc>,
}

impl PerformanceMetrics {
    pub(crate) fn collect(
        counters: &AccessCounters,
        memory_usage: u64,
        entry_count: usize,
        average_access_frequency: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let total_hits = counters.hits();
        let total_misses = counters.misses();
        let total_requests = total_hits + total_misses;
        let hit_rate = percentage(total_hits, total_requests);
        let miss_rate = if total_requests == 0 {
            0.0
        } else {
            100.0 - hit_rate
        };

        Self {
            hit_rate,
            miss_rate,
            average_response_time: counters.average_response_time_ms(),
            memory_usage,
            eviction_count: counters.evictions(),
            eviction_rate: counters.eviction_rate(),
            total_requests,
            total_hits,
            total_misses,
            entry_count,
            average_access_frequency,
            last_updated: now,
        }
    }
}

/// Structural snapshot of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub max_size: usize,
    pub memory_usage: u64,
    pub priority_distribution: BTreeMap<Priority, usize>,
    pub data_type_distribution: BTreeMap<String, usize>,
    pub dependency_nodes: usize,
    pub dependency_edges: usize,
    pub tracked_patterns: usize,
    pub tags: usize,
    pub expired_entries: usize,
    pub hottest_keys: Vec<(String, f64)>,
    pub sets: u64,
    pub deletes: u64,
    pub invalidations: u64,
    pub expirations: u64,
    pub secondary_hits: u64,
}
