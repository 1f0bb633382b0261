//! Internal storage implementation for the cache.
//!
//! The store keeps entries in an `IndexMap` so iteration follows insertion
//! order, which is what eviction falls back to on equal scores. The
//! dependency graph, usage patterns and tag index live alongside the entries
//! so one lock covers all of them.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::dependency::DependencyGraph;
use crate::entry::{CacheEntry, Priority};
use crate::error::{CacheError, CacheResult};
use crate::eviction::{capacity_victim_count, select_victims};
use crate::stats::CacheStats;
use crate::strategy::EntrySelector;
use crate::usage::UsageTracker;

/// Result of a lookup in the primary store.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Lookup {
    Hit(Bytes),
    /// The entry existed but had expired; it has been removed.
    Expired,
    Missing,
}

/// A write with every default already resolved.
#[derive(Debug, Clone)]
pub(crate) struct Write {
    pub key: String,
    pub value: Bytes,
    pub data_type: String,
    pub priority: Priority,
    pub ttl: Duration,
    pub dependencies: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    /// Re-admission of a value from the secondary tier. The key keeps the
    /// dependencies and tags it had before it left the store; the ones above
    /// are ignored.
    pub promoted: bool,
}

/// What a write had to remove to make room.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct WriteOutcome {
    pub evicted: Vec<String>,
    pub expired: Vec<String>,
    pub replaced: bool,
}

/// Keys touched by a cascading invalidation.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Invalidation {
    /// Keys whose entries were removed, in cascade order.
    pub removed: Vec<String>,
    /// Every key the cascade reached, including ones with no entry (evicted,
    /// expired or never cached).
    pub reached: Vec<String>,
}

#[derive(Debug)]
pub(crate) struct Store {
    entries: IndexMap<String, CacheEntry>,
    graph: DependencyGraph,
    usage: UsageTracker,
    tags: HashMap<String, HashSet<String>>,
    memory_bytes: u64,
    max_size: usize,
}

impl Store {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            graph: DependencyGraph::new(),
            usage: UsageTracker::new(),
            tags: HashMap::new(),
            memory_bytes: 0,
            max_size,
        }
    }

    /// Look up `key`, recording the access whether or not it hits.
    pub fn lookup(&mut self, key: &str, now: DateTime<Utc>) -> Lookup {
        self.usage.record_access(key, now);

        let Some(entry) = self.entries.get_mut(key) else {
            return Lookup::Missing;
        };
        if entry.is_valid_at(now) {
            entry.touch_at(now);
            return Lookup::Hit(entry.value().clone());
        }

        self.remove_entry(key);
        Lookup::Expired
    }

    /// Validity check that leaves access statistics alone.
    pub fn contains(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .get(key)
            .map_or(false, |entry| entry.is_valid_at(now))
    }

    pub fn entry(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// TTL for a new write of `key`, scaled by its observed frequency.
    pub fn adaptive_ttl(&self, key: &str, base: Duration) -> Duration {
        self.usage.adaptive_ttl(key, base)
    }

    /// Insert or replace an entry.
    ///
    /// Replacing never evicts. A new key at capacity first sweeps expired
    /// entries, then evicts the least useful ones if the store is still full.
    pub fn insert(&mut self, mut write: Write, now: DateTime<Utc>) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();

        if write.promoted {
            write.dependencies = self
                .graph
                .node(&write.key)
                .map(|node| node.dependencies.clone())
                .unwrap_or_default();
            write.tags = self.tags_of(&write.key);
        } else {
            self.forget_tags(&write.key);
        }

        if self.remove_entry(&write.key).is_some() {
            outcome.replaced = true;
        } else if self.entries.len() >= self.max_size {
            outcome.expired = self.sweep_expired(now);
            if self.entries.len() >= self.max_size {
                let count = capacity_victim_count(self.entries.len());
                let victims = select_victims(self.entries.values(), count, now);
                for victim in &victims {
                    self.remove_entry(victim);
                }
                outcome.evicted = victims;
            }
        }

        self.graph.register(&write.key, &write.dependencies, now);
        for tag in &write.tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(write.key.clone());
        }

        let entry = CacheEntry::new(
            write.key.clone(),
            write.value,
            write.data_type,
            write.priority,
            write.ttl,
            now,
        )
        .with_dependencies(write.dependencies)
        .with_tags(write.tags);

        self.memory_bytes += entry.size_bytes() as u64;
        self.entries.insert(write.key, entry);
        outcome
    }

    /// Remove `roots` and everything that transitively depends on them.
    pub fn invalidate<'a>(&mut self, roots: impl IntoIterator<Item = &'a str>) -> Invalidation {
        let mut visited = HashSet::new();
        let mut outcome = Invalidation::default();

        for root in roots {
            for key in self.graph.cascade(root, &mut visited) {
                if self.remove_entry(&key).is_some() {
                    outcome.removed.push(key.clone());
                }
                self.forget_tags(&key);
                self.graph.detach(&key);
                outcome.reached.push(key);
            }
        }
        outcome
    }

    pub fn invalidate_tag(&mut self, tag: &str) -> Invalidation {
        let members: BTreeSet<String> = match self.tags.get(tag) {
            Some(keys) => keys.iter().cloned().collect(),
            None => return Invalidation::default(),
        };
        self.invalidate(members.iter().map(String::as_str))
    }

    /// Remove a single entry without cascading.
    pub fn delete(&mut self, key: &str) -> bool {
        let existed = self.remove_entry(key).is_some();
        if existed {
            self.forget_tags(key);
            self.graph.detach(key);
        }
        existed
    }

    /// Remove every expired entry and return their keys. Graph edges and tag
    /// memberships are kept.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|entry| !entry.is_valid_at(now))
            .map(|entry| entry.key().to_string())
            .collect();

        for key in &expired {
            self.remove_entry(key);
        }
        expired
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.graph.clear();
        self.usage.clear();
        self.tags.clear();
        self.memory_bytes = 0;
    }

    /// Scale the TTL of matching live entries. Returns how many changed.
    pub fn adjust_ttl(
        &mut self,
        selector: &EntrySelector,
        multiplier: f64,
        now: DateTime<Utc>,
    ) -> usize {
        let mut changed = 0;
        for entry in self.entries.values_mut() {
            if entry.is_valid_at(now) && selector.matches(entry, now) {
                entry.ttl = Duration::try_from_secs_f64(entry.ttl.as_secs_f64() * multiplier)
                    .unwrap_or(Duration::MAX);
                changed += 1;
            }
        }
        changed
    }

    pub fn change_priority(
        &mut self,
        selector: &EntrySelector,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> usize {
        let mut changed = 0;
        for entry in self.entries.values_mut() {
            if entry.is_valid_at(now) && selector.matches(entry, now) && entry.priority != priority {
                entry.priority = priority;
                changed += 1;
            }
        }
        changed
    }

    /// Evict `percentage` percent (rounded up) of the matching live entries,
    /// least useful first.
    pub fn evict_matching(
        &mut self,
        selector: &EntrySelector,
        percentage: f64,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let candidates: Vec<&CacheEntry> = self
            .entries
            .values()
            .filter(|entry| entry.is_valid_at(now) && selector.matches(entry, now))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let count = ((candidates.len() as f64 * percentage / 100.0).ceil() as usize)
            .clamp(1, candidates.len());
        let victims = select_victims(candidates, count, now);
        for victim in &victims {
            self.remove_entry(victim);
        }
        victims
    }

    /// Grow the capacity by `factor`, capped at `limit`.
    ///
    /// Returns the previous and new capacity.
    pub fn resize(&mut self, factor: f64, limit: usize) -> CacheResult<(usize, usize)> {
        let current = self.max_size;
        if current >= limit {
            return Err(CacheError::CapacityLimit { current, limit });
        }
        let grown = (current as f64 * factor).ceil() as usize;
        self.max_size = grown.clamp(current + 1, limit);
        Ok((current, self.max_size))
    }

    /// Rebase usage frequencies and re-derive the priority of entries with a
    /// known pattern. Returns the number of entries whose priority changed.
    pub fn analyze(&mut self, now: DateTime<Utc>) -> usize {
        self.usage.analyze(now);

        let mut changed = 0;
        for entry in self.entries.values_mut() {
            if let Some(priority) = self.usage.derived_priority(entry.key()) {
                if entry.priority != priority {
                    entry.priority = priority;
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Total recorded accesses of keys in `scope`.
    pub fn scope_accesses(&self, scope: &str) -> u64 {
        self.usage
            .total_accesses_where(|key| crate::config::scope_of(key) == Some(scope))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn memory_bytes(&self) -> u64 {
        self.memory_bytes
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn average_frequency(&self) -> f64 {
        self.usage.average_frequency()
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Structural part of [`CacheStats`]; counter fields are left at zero.
    pub fn stats(&self, now: DateTime<Utc>) -> CacheStats {
        let mut priority_distribution = BTreeMap::new();
        let mut data_type_distribution = BTreeMap::new();
        let mut expired_entries = 0;

        for entry in self.entries.values() {
            *priority_distribution.entry(entry.priority()).or_insert(0) += 1;
            *data_type_distribution
                .entry(entry.data_type().to_string())
                .or_insert(0) += 1;
            if !entry.is_valid_at(now) {
                expired_entries += 1;
            }
        }

        CacheStats {
            entry_count: self.entries.len(),
            max_size: self.max_size,
            memory_usage: self.memory_bytes,
            priority_distribution,
            data_type_distribution,
            dependency_nodes: self.graph.len(),
            dependency_edges: self.graph.edge_count(),
            tracked_patterns: self.usage.len(),
            tags: self.tags.len(),
            expired_entries,
            hottest_keys: self.usage.hottest(10),
            sets: 0,
            deletes: 0,
            invalidations: 0,
            expirations: 0,
            secondary_hits: 0,
        }
    }

    /// Drop an entry. Graph edges and tag memberships are untouched.
    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.shift_remove(key)?;
        self.memory_bytes = self.memory_bytes.saturating_sub(entry.size_bytes() as u64);
        Some(entry)
    }

    fn tags_of(&self, key: &str) -> BTreeSet<String> {
        self.tags
            .iter()
            .filter(|(_, members)| members.contains(key))
            .map(|(tag, _)| tag.clone())
            .collect()
    }

    fn forget_tags(&mut self, key: &str) {
        self.tags.retain(|_, members| {
            members.remove(key);
            !members.is_empty()
        });
    }
}
