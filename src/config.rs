//! Configuration for the adaptive cache.
//!
//! Use the builder pattern to construct configuration:
//!
//! ```
//! use adaptive_cache::CacheConfig;
//! use std::time::Duration;
//!
//! let config = CacheConfig::new()
//!     .max_size(10_000)
//!     .default_ttl(Duration::from_secs(300))
//!     .data_type_ttl("session", Duration::from_secs(1800))
//!     .build();
//! ```
//!
//! The same structure can be loaded from JSON; missing fields fall back to
//! the defaults.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};
use crate::monitor::PerformanceThresholds;
use crate::strategy::{default_strategies, OptimizationStrategy};
use crate::warming::WarmingStrategy;

/// Data type assigned to keys without an explicit type or `type:` prefix.
pub const DEFAULT_DATA_TYPE: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries before a write triggers eviction.
    pub(crate) max_size: usize,

    /// TTL for data types without an entry in `data_type_ttl`.
    pub(crate) default_ttl: Duration,

    /// Base TTL per data type, before usage scaling.
    pub(crate) data_type_ttl: HashMap<String, Duration>,

    /// Data types each data type depends on. Warming expands these to keys
    /// in the same scope.
    pub(crate) data_type_dependencies: HashMap<String, Vec<String>>,

    pub(crate) thresholds: PerformanceThresholds,

    pub(crate) monitor_interval: Duration,
    pub(crate) optimization_interval: Duration,
    pub(crate) analysis_interval: Duration,

    /// Interval for background sweeping of expired entries.
    pub(crate) cleanup_interval: Duration,
    pub(crate) background_cleanup: bool,

    pub(crate) warming_strategies: Vec<WarmingStrategy>,
    pub(crate) warming_batch_size: usize,
    pub(crate) warming_batch_delay: Duration,

    /// Pause between two actions of one strategy.
    pub(crate) action_delay: Duration,
    /// Pause between two strategies of one run.
    pub(crate) strategy_delay: Duration,

    /// Number of optimization results kept.
    pub(crate) history_limit: usize,
    /// Number of monitor samples kept.
    pub(crate) trend_capacity: usize,

    /// Mirror writes into the secondary tier when one is configured.
    pub(crate) write_through: bool,

    pub(crate) optimization_strategies: Vec<OptimizationStrategy>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let data_type_ttl = HashMap::from([
            ("profile".to_string(), Duration::from_secs(10 * 60)),
            ("config".to_string(), Duration::from_secs(60 * 60)),
            ("feed".to_string(), Duration::from_secs(2 * 60)),
        ]);

        Self {
            max_size: 1000,
            default_ttl: Duration::from_secs(5 * 60),
            data_type_ttl,
            data_type_dependencies: HashMap::new(),
            thresholds: PerformanceThresholds::default(),
            monitor_interval: Duration::from_secs(5 * 60),
            optimization_interval: Duration::from_secs(15 * 60),
            analysis_interval: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(60),
            background_cleanup: true,
            warming_strategies: Vec::new(),
            warming_batch_size: 5,
            warming_batch_delay: Duration::from_millis(100),
            action_delay: Duration::from_secs(1),
            strategy_delay: Duration::from_secs(2),
            history_limit: 100,
            trend_capacity: 288,
            write_through: true,
            optimization_strategies: default_strategies(),
        }
    }
}

impl CacheConfig {
    /// Create a new configuration builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document.
    pub fn from_json(json: &str) -> CacheResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> CacheResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the base TTL for one data type.
    pub fn data_type_ttl(mut self, data_type: impl Into<String>, ttl: Duration) -> Self {
        self.data_type_ttl.insert(data_type.into(), ttl);
        self
    }

    /// Declare the data types `data_type` depends on.
    pub fn data_type_dependencies<I, S>(mut self, data_type: impl Into<String>, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data_type_dependencies
            .insert(data_type.into(), deps.into_iter().map(Into::into).collect());
        self
    }

    pub fn thresholds(mut self, thresholds: PerformanceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn optimization_interval(mut self, interval: Duration) -> Self {
        self.optimization_interval = interval;
        self
    }

    pub fn analysis_interval(mut self, interval: Duration) -> Self {
        self.analysis_interval = interval;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Enable or disable the background sweep of expired entries.
    ///
    /// When disabled, expired entries are only removed on access or when a
    /// full store needs room.
    pub fn background_cleanup(mut self, enabled: bool) -> Self {
        self.background_cleanup = enabled;
        self
    }

    pub fn warming_strategy(mut self, strategy: WarmingStrategy) -> Self {
        self.warming_strategies.push(strategy);
        self
    }

    pub fn warming_batch_size(mut self, size: usize) -> Self {
        self.warming_batch_size = size;
        self
    }

    pub fn warming_batch_delay(mut self, delay: Duration) -> Self {
        self.warming_batch_delay = delay;
        self
    }

    pub fn action_delay(mut self, delay: Duration) -> Self {
        self.action_delay = delay;
        self
    }

    pub fn strategy_delay(mut self, delay: Duration) -> Self {
        self.strategy_delay = delay;
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn trend_capacity(mut self, capacity: usize) -> Self {
        self.trend_capacity = capacity;
        self
    }

    pub fn write_through(mut self, enabled: bool) -> Self {
        self.write_through = enabled;
        self
    }

    /// Replace the optimization strategy set.
    pub fn optimization_strategies(mut self, strategies: Vec<OptimizationStrategy>) -> Self {
        self.optimization_strategies = strategies;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> Self {
        self
    }

    pub fn get_max_size(&self) -> usize {
        self.max_size
    }

    pub fn get_default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn get_thresholds(&self) -> &PerformanceThresholds {
        &self.thresholds
    }

    pub fn get_warming_strategies(&self) -> &[WarmingStrategy] {
        &self.warming_strategies
    }

    /// Base TTL for a data type.
    pub fn ttl_for(&self, data_type: &str) -> Duration {
        self.data_type_ttl
            .get(data_type)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    pub(crate) fn dependencies_for(&self, data_type: &str) -> &[String] {
        self.data_type_dependencies
            .get(data_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Check values the engine cannot run with, including every configured
    /// strategy.
    pub(crate) fn validate(&self) -> CacheResult<()> {
        if self.max_size == 0 {
            return Err(CacheError::InvalidConfig("max_size must be non-zero".into()));
        }
        if self.default_ttl.is_zero() {
            return Err(CacheError::InvalidConfig(
                "default_ttl must be non-zero".into(),
            ));
        }
        if self.warming_batch_size == 0 {
            return Err(CacheError::InvalidConfig(
                "warming_batch_size must be non-zero".into(),
            ));
        }
        for (name, interval) in [
            ("monitor_interval", self.monitor_interval),
            ("optimization_interval", self.optimization_interval),
            ("analysis_interval", self.analysis_interval),
            ("cleanup_interval", self.cleanup_interval),
        ] {
            if interval.is_zero() {
                return Err(CacheError::InvalidConfig(format!(
                    "{} must be non-zero",
                    name
                )));
            }
        }

        let mut names = HashSet::new();
        for strategy in &self.optimization_strategies {
            strategy.validate_with_warming(&self.warming_strategies)?;
            if !names.insert(strategy.name.as_str()) {
                return Err(CacheError::DuplicateStrategy(strategy.name.clone()));
            }
        }

        let mut names = HashSet::new();
        for strategy in &self.warming_strategies {
            if strategy.name.trim().is_empty() {
                return Err(CacheError::InvalidConfig(
                    "warming strategy name is empty".into(),
                ));
            }
            if !names.insert(strategy.name.as_str()) {
                return Err(CacheError::InvalidConfig(format!(
                    "duplicate warming strategy '{}'",
                    strategy.name
                )));
            }
        }
        Ok(())
    }
}

/// Data type of a key: the part before the first `:`, or the default type.
pub fn data_type_of(key: &str) -> &str {
    match key.split_once(':') {
        Some((prefix, _)) if !prefix.is_empty() => prefix,
        _ => DEFAULT_DATA_TYPE,
    }
}

/// Key under which a data type is cached for a scope.
pub fn scoped_key(data_type: &str, scope: &str) -> String {
    format!("{}:{}", data_type, scope)
}

/// Scope part of a key built by [`scoped_key`].
pub fn scope_of(key: &str) -> Option<&str> {
    key.split_once(':').map(|(_, scope)| scope)
}
