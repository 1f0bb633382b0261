//! The main cache interface.
//!
//! This module provides [`AdaptiveCache`], the handle applications use. It
//! owns the entry store together with the metrics, monitoring, optimization
//! and warming machinery, and is cheap to clone.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::{data_type_of, scoped_key, CacheConfig};
use crate::entry::{CacheEntry, Priority};
use crate::error::CacheResult;
use crate::monitor::{PerformanceAlert, PerformanceMonitor, TrendSummary};
use crate::optimizer::{OptimizationEngine, OptimizationResult, OptimizationRun};
use crate::scheduler::{self, BackgroundTasks};
use crate::stats::{AccessCounters, CacheStats, PerformanceMetrics};
use crate::storage::{Lookup, Store, Write};
use crate::strategy::{ActionKind, OptimizationStrategy};
use crate::tier::SecondaryCache;
use crate::warming::{DataFetcher, WarmingController, WarmingReport, WarmingStrategy};

/// Per-write options. Unset fields fall back to the configured defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOptions {
    /// Keys this entry is derived from.
    pub dependencies: Vec<String>,
    pub priority: Option<Priority>,
    /// Overrides the adaptive TTL.
    pub ttl: Option<Duration>,
    /// Overrides the data type taken from the key prefix.
    pub data_type: Option<String>,
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depends_on(mut self, key: impl Into<String>) -> Self {
        self.dependencies.push(key.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Where a write comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteSource {
    /// A caller or the warming controller. Counted as a set and written
    /// through to the secondary tier.
    Client,
    /// A value re-admitted from the secondary tier.
    Secondary,
}

struct Inner {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    store: Mutex<Store>,
    counters: AccessCounters,
    monitor: Mutex<PerformanceMonitor>,
    optimizer: OptimizationEngine,
    warming: WarmingController,
    secondary: Option<Arc<dyn SecondaryCache>>,
}

/// A self-tuning, thread-safe in-memory cache.
///
/// # Features
/// - **Dependency-aware invalidation**: invalidating a key removes everything
///   derived from it.
/// - **Adaptive TTL and priority**: frequently read keys live longer and are
///   harder to evict.
/// - **Monitoring**: threshold alerts and a rolling metrics history.
/// - **Optimization**: declarative strategies that tune the cache when their
///   conditions hold.
/// - **Warming**: pre-loading through a [`DataFetcher`].
///
/// # Example
/// ```
/// use adaptive_cache::{AdaptiveCache, CacheConfig, SetOptions};
///
/// let cache = AdaptiveCache::new(CacheConfig::default()).unwrap();
///
/// cache.set("user:42", "Alice");
/// cache.set_with("feed:42", "[...]", SetOptions::new().depends_on("user:42"));
///
/// assert!(cache.get("feed:42").is_some());
/// let removed = cache.invalidate("user:42");
/// assert_eq!(removed, vec!["user:42", "feed:42"]);
/// ```
#[derive(Clone)]
pub struct AdaptiveCache {
    inner: Arc<Inner>,
}

/// Builder for caches with collaborators attached.
pub struct AdaptiveCacheBuilder {
    config: CacheConfig,
    fetcher: Option<Arc<dyn DataFetcher>>,
    secondary: Option<Arc<dyn SecondaryCache>>,
    clock: Arc<dyn Clock>,
}

impl AdaptiveCacheBuilder {
    pub fn fetcher(mut self, fetcher: Arc<dyn DataFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn secondary(mut self, secondary: Arc<dyn SecondaryCache>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    /// Replace the wall clock, typically with a [`ManualClock`](crate::ManualClock)
    /// in tests.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> CacheResult<AdaptiveCache> {
        self.config.validate()?;
        Ok(AdaptiveCache::assemble(
            self.config,
            self.fetcher,
            self.secondary,
            self.clock,
        ))
    }
}

impl AdaptiveCache {
    /// Create a cache with the given configuration and no collaborators.
    ///
    /// Fails if the configuration or one of its strategies is invalid.
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        Self::builder(config).build()
    }

    fn assemble(
        config: CacheConfig,
        fetcher: Option<Arc<dyn DataFetcher>>,
        secondary: Option<Arc<dyn SecondaryCache>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let optimizer = OptimizationEngine::new(
            config.optimization_strategies.clone(),
            config.history_limit,
            config.action_delay,
            config.strategy_delay,
        );
        let warming = WarmingController::new(
            config.warming_strategies.clone(),
            fetcher,
            config.warming_batch_size,
            config.warming_batch_delay,
        );
        let monitor = PerformanceMonitor::new(config.thresholds.clone(), config.trend_capacity);

        Self {
            inner: Arc::new(Inner {
                store: Mutex::new(Store::new(config.max_size)),
                counters: AccessCounters::new(),
                monitor: Mutex::new(monitor),
                optimizer,
                warming,
                secondary,
                clock,
                config,
            }),
        }
    }

    pub fn builder(config: CacheConfig) -> AdaptiveCacheBuilder {
        AdaptiveCacheBuilder {
            config,
            fetcher: None,
            secondary: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Get a value from the cache.
    ///
    /// Returns `None` if the key has expired, or if it doesn't exist and the
    /// secondary tier (if any) has nothing either. An expired key is dropped
    /// from the secondary tier as well. Hits and misses both count toward the
    /// key's usage pattern.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let started = Instant::now();
        let now = self.now();
        let lookup = self.inner.store.lock().lookup(key, now);

        match lookup {
            Lookup::Hit(value) => {
                self.inner.counters.record_hit(started.elapsed());
                return Some(value);
            }
            Lookup::Expired => {
                debug!(key, "entry expired");
                self.drop_from_secondary([key]);
                self.inner.counters.record_expirations(1);
                self.inner.counters.record_miss(started.elapsed());
                return None;
            }
            Lookup::Missing => {}
        }

        if let Some(value) = self.inner.secondary.as_ref().and_then(|s| s.get(key)) {
            self.write(
                key.to_string(),
                value.clone(),
                SetOptions::default(),
                WriteSource::Secondary,
            );
            self.inner.counters.record_secondary_hit();
            self.inner.counters.record_hit(started.elapsed());
            debug!(key, "promoted from secondary cache");
            return Some(value);
        }

        self.inner.counters.record_miss(started.elapsed());
        None
    }

    /// Get the entry a data type holds for a scope, e.g. a user address.
    ///
    /// The scope is remembered for optimizer-initiated warming.
    pub fn get_scoped(&self, data_type: &str, scope: &str) -> Option<Bytes> {
        self.inner.warming.remember_scope(scope);
        self.get(&scoped_key(data_type, scope))
    }

    /// Set a value with default options.
    ///
    /// # Example
    /// ```
    /// use adaptive_cache::AdaptiveCache;
    ///
    /// let cache = AdaptiveCache::default();
    /// cache.set("string_key", "string value");
    /// cache.set("bytes_key", vec![1, 2, 3, 4]);
    /// ```
    pub fn set(&self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.set_with(key, value, SetOptions::default());
    }

    /// Set a value with an explicit TTL.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: impl Into<Bytes>, ttl: Duration) {
        self.set_with(key, value, SetOptions::new().ttl(ttl));
    }

    /// Set a value with dependencies, tags, priority or TTL.
    ///
    /// # Example
    /// ```
    /// use adaptive_cache::{AdaptiveCache, Priority, SetOptions};
    /// use std::time::Duration;
    ///
    /// let cache = AdaptiveCache::default();
    /// cache.set_with(
    ///     "portfolio:0xabc",
    ///     "{}",
    ///     SetOptions::new()
    ///         .depends_on("balances:0xabc")
    ///         .tag("wallet:0xabc")
    ///         .priority(Priority::High)
    ///         .ttl(Duration::from_secs(30)),
    /// );
    /// ```
    pub fn set_with(&self, key: impl Into<String>, value: impl Into<Bytes>, options: SetOptions) {
        self.write(key.into(), value.into(), options, WriteSource::Client);
    }

    /// Remove `key` and, transitively, every entry that depends on it, from
    /// both tiers.
    ///
    /// Returns the keys whose entries were removed from the primary store.
    pub fn invalidate(&self, key: &str) -> Vec<String> {
        let outcome = {
            let mut store = self.inner.store.lock();
            let outcome = store.invalidate([key]);
            self.drop_from_secondary(&outcome.reached);
            outcome
        };
        self.record_invalidation(key, &outcome.removed);
        outcome.removed
    }

    /// Invalidate every key carrying `tag`, with cascade.
    pub fn invalidate_by_tag(&self, tag: &str) -> Vec<String> {
        let outcome = {
            let mut store = self.inner.store.lock();
            let outcome = store.invalidate_tag(tag);
            self.drop_from_secondary(&outcome.reached);
            outcome
        };
        self.record_invalidation(tag, &outcome.removed);
        outcome.removed
    }

    /// Delete a key from both tiers without touching its dependents.
    ///
    /// Returns `true` if the key existed in the primary store.
    pub fn delete(&self, key: &str) -> bool {
        let existed = {
            let mut store = self.inner.store.lock();
            let existed = store.delete(key);
            self.drop_from_secondary([key]);
            existed
        };
        if existed {
            self.inner.counters.record_delete();
        }
        existed
    }

    /// Check if a live entry exists. Does not count as an access.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.now();
        self.inner.store.lock().contains(key, now)
    }

    /// Snapshot of an entry, expired or not, without recording an access.
    pub fn peek_entry(&self, key: &str) -> Option<CacheEntry> {
        self.inner.store.lock().entry(key).cloned()
    }

    /// Number of entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current capacity; optimization may raise it.
    pub fn capacity(&self) -> usize {
        self.inner.store.lock().max_size()
    }

    /// Remove all expired entries from both tiers. Returns how many were
    /// removed from the primary store.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.now();
        let removed = {
            let mut store = self.inner.store.lock();
            let expired = store.sweep_expired(now);
            self.drop_from_secondary(&expired);
            expired.len()
        };
        if removed > 0 {
            self.inner.counters.record_expirations(removed as u64);
            debug!(removed, "swept expired entries");
        }
        removed
    }

    /// Remove all entries, edges, tags and usage patterns, and reset counters,
    /// alerts, metrics history and known warming scopes.
    pub fn clear(&self) {
        self.inner.store.lock().clear();
        self.inner.counters.reset();
        self.inner.monitor.lock().clear();
        self.inner.warming.clear();
        info!("cache cleared");
    }

    /// Fetch and store the data types of the configured warming strategies
    /// for `scope`. With `strategy` set only that strategy runs.
    ///
    /// # Example
    /// ```
    /// use adaptive_cache::{AdaptiveCache, CacheConfig, DataFetcher, WarmingStrategy};
    /// use async_trait::async_trait;
    /// use bytes::Bytes;
    /// use std::sync::Arc;
    ///
    /// struct Profiles;
    ///
    /// #[async_trait]
    /// impl DataFetcher for Profiles {
    ///     async fn fetch(&self, data_type: &str, scope: &str) -> anyhow::Result<Option<Bytes>> {
    ///         Ok(Some(Bytes::from(format!("{}/{}", data_type, scope))))
    ///     }
    /// }
    ///
    /// # tokio_test();
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn tokio_test() {
    /// let config = CacheConfig::new()
    ///     .warming_strategy(WarmingStrategy::new("login", ["profile"]))
    ///     .build();
    /// let cache = AdaptiveCache::builder(config)
    ///     .fetcher(Arc::new(Profiles))
    ///     .build()
    ///     .unwrap();
    ///
    /// let report = cache.warm_cache("0xabc", None).await.unwrap();
    /// assert_eq!(report.warmed, vec!["profile:0xabc"]);
    /// assert!(cache.contains("profile:0xabc"));
    /// # }
    /// ```
    pub async fn warm_cache(
        &self,
        scope: &str,
        strategy: Option<&str>,
    ) -> CacheResult<WarmingReport> {
        self.inner.warming.warm(self, scope, strategy).await
    }

    /// Raise or lower a named signal read by `ExternalSignal` warming
    /// conditions.
    pub fn set_signal(&self, name: &str, active: bool) {
        self.inner.warming.set_signal(name, active);
    }

    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        let now = self.now();
        let (memory, entries, frequency) = {
            let store = self.inner.store.lock();
            (store.memory_bytes(), store.len(), store.average_frequency())
        };
        PerformanceMetrics::collect(&self.inner.counters, memory, entries, frequency, now)
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        let now = self.now();
        let mut stats = self.inner.store.lock().stats(now);
        let counters = &self.inner.counters;
        stats.sets = counters.sets();
        stats.deletes = counters.deletes();
        stats.invalidations = counters.invalidations();
        stats.expirations = counters.expirations();
        stats.secondary_hits = counters.secondary_hits();
        stats
    }

    /// Strategies that would run now, in application order. Has no side
    /// effects.
    pub fn get_optimization_recommendations(&self) -> Vec<OptimizationStrategy> {
        let metrics = self.get_performance_metrics();
        let now = self.now();
        let monitor = self.inner.monitor.lock();
        self.inner.optimizer.applicable(&metrics, &monitor, now)
    }

    /// Apply every applicable strategy. Returns [`OptimizationRun::Skipped`]
    /// if another run is in progress.
    pub async fn run_optimization(&self) -> OptimizationRun {
        self.inner.optimizer.run(self).await
    }

    pub fn add_strategy(&self, strategy: OptimizationStrategy) -> CacheResult<()> {
        self.inner
            .optimizer
            .add_strategy(strategy, self.inner.warming.strategies())
    }

    pub fn remove_strategy(&self, name: &str) -> CacheResult<OptimizationStrategy> {
        self.inner.optimizer.remove_strategy(name)
    }

    pub fn toggle_strategy(&self, name: &str, enabled: bool) -> CacheResult<()> {
        self.inner.optimizer.toggle_strategy(name, enabled)
    }

    pub fn strategies(&self) -> Vec<OptimizationStrategy> {
        self.inner.optimizer.strategies()
    }

    pub fn warming_strategies(&self) -> &[WarmingStrategy] {
        self.inner.warming.strategies()
    }

    pub fn optimization_history(&self) -> Vec<OptimizationResult> {
        self.inner.optimizer.history()
    }

    /// Rebase access frequencies to hourly rates and re-derive entry
    /// priorities. Returns how many entries changed priority.
    pub fn analyze_usage_patterns(&self) -> usize {
        let now = self.now();
        let changed = self.inner.store.lock().analyze(now);
        info!(changed, "usage patterns analyzed");
        changed
    }

    /// Sample metrics once, raising any new alerts.
    pub fn run_monitor_tick(&self) -> Vec<PerformanceAlert> {
        let metrics = self.get_performance_metrics();
        let now = self.now();
        self.inner.monitor.lock().tick(metrics, now)
    }

    /// Alerts raised in the last 24 hours.
    pub fn alerts(&self) -> Vec<PerformanceAlert> {
        self.inner.monitor.lock().alerts().to_vec()
    }

    pub fn trend_summary(&self) -> TrendSummary {
        self.inner.monitor.lock().trend_summary()
    }

    /// Metric samples recorded by monitor ticks, oldest first.
    pub fn trend_history(&self) -> Vec<PerformanceMetrics> {
        self.inner.monitor.lock().history().cloned().collect()
    }

    /// Spawn the periodic monitor, optimization, analysis and cleanup tasks
    /// on the current tokio runtime.
    ///
    /// The tasks stop when the returned handle is dropped or shut down.
    pub fn start_background_tasks(&self) -> CacheResult<BackgroundTasks> {
        scheduler::spawn(self.clone())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub(crate) fn scope_accesses(&self, scope: &str) -> u64 {
        self.inner.store.lock().scope_accesses(scope)
    }

    /// Store a fetched value with the data type's configured dependencies.
    pub(crate) fn store_warmed(
        &self,
        key: &str,
        value: Bytes,
        data_type: &str,
        scope: &str,
        priority: Priority,
    ) {
        let config = &self.inner.config;
        let mut options = SetOptions::new()
            .data_type(data_type)
            .priority(priority)
            .ttl(config.ttl_for(data_type));
        for dependency in config.dependencies_for(data_type) {
            options = options.depends_on(scoped_key(dependency, scope));
        }
        self.write(key.to_string(), value, options, WriteSource::Client);
    }

    /// Apply one optimization action. Returns the number of entries (or
    /// capacity slots) affected.
    pub(crate) async fn apply_action(&self, action: &ActionKind) -> CacheResult<usize> {
        let now = self.now();
        match action {
            ActionKind::AdjustTtl {
                multiplier,
                selector,
            } => {
                let changed = self.inner.store.lock().adjust_ttl(selector, *multiplier, now);
                Ok(changed)
            }
            ActionKind::ChangePriority { priority, selector } => {
                let changed = self
                    .inner
                    .store
                    .lock()
                    .change_priority(selector, *priority, now);
                Ok(changed)
            }
            ActionKind::EvictEntries {
                percentage,
                selector,
            } => {
                let evicted = self
                    .inner
                    .store
                    .lock()
                    .evict_matching(selector, *percentage, now);
                self.inner.counters.record_evictions(evicted.len() as u64);
                Ok(evicted.len())
            }
            ActionKind::ResizeCache { factor, limit } => {
                let resized = self.inner.store.lock().resize(*factor, *limit);
                let (from, to) = resized?;
                info!(from, to, "cache capacity raised");
                Ok(to - from)
            }
            ActionKind::WarmCache { strategies } => {
                let mut warmed = 0;
                for scope in self.inner.warming.known_scopes() {
                    if strategies.is_empty() {
                        warmed += self.warm_cache(&scope, None).await?.warmed.len();
                    } else {
                        for name in strategies {
                            warmed += self
                                .warm_cache(&scope, Some(name.as_str()))
                                .await?
                                .warmed
                                .len();
                        }
                    }
                }
                Ok(warmed)
            }
        }
    }

    fn write(&self, key: String, value: Bytes, options: SetOptions, source: WriteSource) {
        let now = self.now();
        let config = &self.inner.config;
        let data_type = options
            .data_type
            .unwrap_or_else(|| data_type_of(&key).to_string());
        let mirrored = match &self.inner.secondary {
            Some(secondary) if source == WriteSource::Client && config.write_through => {
                Some((Arc::clone(secondary), value.clone()))
            }
            _ => None,
        };

        let outcome = {
            let mut store = self.inner.store.lock();
            let ttl = options
                .ttl
                .unwrap_or_else(|| store.adaptive_ttl(&key, config.ttl_for(&data_type)));
            let outcome = store.insert(
                Write {
                    key: key.clone(),
                    value,
                    data_type,
                    priority: options.priority.unwrap_or_default(),
                    ttl,
                    dependencies: options.dependencies.into_iter().collect::<BTreeSet<_>>(),
                    tags: options.tags.into_iter().collect::<BTreeSet<_>>(),
                    promoted: source == WriteSource::Secondary,
                },
                now,
            );
            self.drop_from_secondary(&outcome.expired);
            outcome
        };

        let counters = &self.inner.counters;
        if source == WriteSource::Client {
            counters.record_set(!outcome.evicted.is_empty());
        }
        counters.record_evictions(outcome.evicted.len() as u64);
        counters.record_expirations(outcome.expired.len() as u64);
        if !outcome.evicted.is_empty() {
            debug!(key = %key, evicted = ?outcome.evicted, "evicted entries to make room");
        }

        if let Some((secondary, value)) = mirrored {
            secondary.set(&key, value);
        }
    }

    fn drop_from_secondary<I>(&self, keys: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        if let Some(secondary) = &self.inner.secondary {
            for key in keys {
                secondary.remove(key.as_ref());
            }
        }
    }

    fn record_invalidation(&self, root: &str, removed: &[String]) {
        self.inner.counters.record_invalidations(removed.len() as u64);
        if !removed.is_empty() {
            info!(root, removed = removed.len(), "invalidated entries");
        }
    }
}

impl Default for AdaptiveCache {
    fn default() -> Self {
        Self::assemble(CacheConfig::default(), None, None, Arc::new(SystemClock))
    }
}

impl fmt::Debug for AdaptiveCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("secondary", &self.inner.secondary.is_some())
            .field("warming", &self.inner.warming)
            .finish()
    }
}
