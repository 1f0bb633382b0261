//! Cache entry with metadata for TTL, priority and access tracking.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::elapsed;

/// Retention priority of an entry. Higher priorities survive eviction longer.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Weight used by the usefulness score.
    pub fn weight(self) -> u64 {
        match self {
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
            Priority::Critical => 4,
        }
    }

    /// Priority implied by an access frequency (accesses per hour).
    pub fn from_frequency(frequency: f64) -> Self {
        if frequency > 20.0 {
            Priority::Critical
        } else if frequency > 10.0 {
            Priority::High
        } else if frequency > 3.0 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single cache entry containing the value and its metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub(crate) key: String,
    pub(crate) value: Bytes,
    pub(crate) data_type: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_accessed_at: DateTime<Utc>,
    pub(crate) access_count: u64,
    pub(crate) dependencies: BTreeSet<String>,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) priority: Priority,
    pub(crate) size_bytes: usize,
    pub(crate) ttl: Duration,
}

impl CacheEntry {
    /// Create a fresh entry. The size is estimated from the key and the
    /// payload length.
    pub fn new(
        key: impl Into<String>,
        value: Bytes,
        data_type: impl Into<String>,
        priority: Priority,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let key = key.into();
        let size_bytes = estimate_size(&key, &value);
        Self {
            key,
            value,
            data_type: data_type.into(),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            dependencies: BTreeSet::new(),
            tags: BTreeSet::new(),
            priority,
            size_bytes,
            ttl,
        }
    }

    pub(crate) fn with_dependencies(mut self, dependencies: BTreeSet<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub(crate) fn with_tags(mut self, tags: BTreeSet<String>) -> Self {
        self.tags = tags;
        self
    }

    /// An entry is valid while `now - created_at < ttl`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        elapsed(self.created_at, now) < self.ttl
    }

    /// Record a hit at `now`.
    pub fn touch_at(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed_at = now;
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        elapsed(self.created_at, now)
    }

    pub fn idle_at(&self, now: DateTime<Utc>) -> Duration {
        elapsed(self.last_accessed_at, now)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        self.last_accessed_at
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }
}

/// Serialized-length heuristic. Only feeds memory-pressure signals.
pub(crate) fn estimate_size(key: &str, value: &Bytes) -> usize {
    key.len() + value.len()
}
