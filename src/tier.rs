//! Slower-tier cache consulted when the primary store misses.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;

/// A shared, slower cache (for example an application-wide cache) that the
/// engine falls back to on a miss and optionally writes through to.
///
/// Keys that are invalidated, deleted or expire in the primary store are
/// removed here too. Evicted keys stay, so they can be promoted back.
pub trait SecondaryCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Bytes>;

    fn set(&self, key: &str, value: Bytes);

    fn remove(&self, key: &str);
}

/// In-memory secondary tier backed by a `DashMap`.
#[derive(Default)]
pub struct InMemorySecondaryCache {
    storage: DashMap<String, Bytes>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl InMemorySecondaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for InMemorySecondaryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySecondaryCache")
            .field("len", &self.storage.len())
            .finish()
    }
}

impl SecondaryCache for InMemorySecondaryCache {
    fn get(&self, key: &str) -> Option<Bytes> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.storage.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: Bytes) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.storage.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.storage.remove(key);
    }
}
