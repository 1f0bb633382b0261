//! Usefulness scoring and victim selection.
//!
//! `score = priority_weight * 1000 + access_count * 100
//!        + max(0, 10000 - age_s) + max(0, 5000 - idle_s)`
//!
//! Priority dominates; within a priority, frequent and recently used entries
//! outrank stale ones. Lowest scores are evicted first.

use chrono::{DateTime, Utc};

use crate::entry::CacheEntry;

/// Share of the store evicted when a write finds it full.
pub const EVICTION_FRACTION: f64 = 0.10;

const PRIORITY_FACTOR: f64 = 1000.0;
const ACCESS_FACTOR: f64 = 100.0;
const AGE_HORIZON_SECS: f64 = 10_000.0;
const IDLE_HORIZON_SECS: f64 = 5_000.0;

pub fn usefulness_score(entry: &CacheEntry, now: DateTime<Utc>) -> f64 {
    let age = entry.age_at(now).as_secs_f64();
    let idle = entry.idle_at(now).as_secs_f64();

    entry.priority().weight() as f64 * PRIORITY_FACTOR
        + entry.access_count() as f64 * ACCESS_FACTOR
        + (AGE_HORIZON_SECS - age).max(0.0)
        + (IDLE_HORIZON_SECS - idle).max(0.0)
}

/// How many entries a capacity eviction removes from a store of `len`.
pub fn capacity_victim_count(len: usize) -> usize {
    ((len as f64 * EVICTION_FRACTION).floor() as usize).max(1)
}

/// Keys of the `count` least useful entries.
///
/// The sort is stable, so equal scores fall back to iteration order, which
/// for the store is insertion order.
pub fn select_victims<'a>(
    entries: impl IntoIterator<Item = &'a CacheEntry>,
    count: usize,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut scored: Vec<(f64, &CacheEntry)> = entries
        .into_iter()
        .map(|e| (usefulness_score(e, now), e))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    scored
        .into_iter()
        .take(count)
        .map(|(_, e)| e.key().to_string())
        .collect()
}
