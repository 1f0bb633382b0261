//! # Adaptive Cache
//!
//! A self-tuning, thread-safe, in-memory application cache.
//!
//! ## Features
//!
//! - **Thread-safe**: share across threads with `Clone` (uses `Arc` internally)
//! - **Dependency-aware invalidation**: invalidating a key cascades to every
//!   entry derived from it, cycles included
//! - **Adaptive TTL and priority**: hot keys live longer and resist eviction
//! - **Usefulness-scored eviction**: priority, access count, age and idle time
//! - **Monitoring**: threshold alerts with deduplication and a rolling history
//! - **Optimization**: declarative condition/action strategies
//! - **Warming**: batched pre-loading through an async [`DataFetcher`]
//! - **Two tiers**: optional [`SecondaryCache`] fallback with write-through
//!
//! ## Quick Start
//!
//! ```rust
//! use adaptive_cache::{AdaptiveCache, CacheConfig, SetOptions};
//! use std::time::Duration;
//!
//! let config = CacheConfig::new()
//!     .max_size(10_000)
//!     .default_ttl(Duration::from_secs(300))
//!     .build();
//!
//! let cache = AdaptiveCache::new(config).unwrap();
//!
//! cache.set("balances:0xabc", "{...}");
//! cache.set_with(
//!     "portfolio:0xabc",
//!     "{...}",
//!     SetOptions::new().depends_on("balances:0xabc"),
//! );
//!
//! // New balances make the portfolio stale too.
//! cache.invalidate("balances:0xabc");
//! assert!(!cache.contains("portfolio:0xabc"));
//!
//! let metrics = cache.get_performance_metrics();
//! println!("Hit rate: {:.1}%", metrics.hit_rate);
//! ```
//!
//! ## Background Work
//!
//! Monitoring, optimization, usage analysis and expiry sweeps can run on a
//! tokio runtime:
//!
//! ```rust
//! use adaptive_cache::AdaptiveCache;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = AdaptiveCache::default();
//! let tasks = cache.start_background_tasks().unwrap();
//! // ...
//! tasks.shutdown().await;
//! # }
//! ```

pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dependency;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod monitor;
pub mod optimizer;
pub mod scheduler;
pub mod stats;
pub mod strategy;
pub mod tier;
pub mod usage;
pub mod warming;

pub(crate) mod storage;

pub use cache::{AdaptiveCache, AdaptiveCacheBuilder, SetOptions};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use entry::{CacheEntry, Priority};
pub use error::{CacheError, CacheResult};
pub use monitor::{
    AlertKind, AlertSeverity, PerformanceAlert, PerformanceThresholds, TrendDirection,
    TrendSummary,
};
pub use optimizer::{OptimizationResult, OptimizationRun};
pub use scheduler::BackgroundTasks;
pub use stats::{CacheStats, PerformanceMetrics};
pub use strategy::{
    ActionKind, ComparisonOperator, EntrySelector, ImpactLevel, Metric, OptimizationAction,
    OptimizationCondition, OptimizationStrategy,
};
pub use tier::{InMemorySecondaryCache, SecondaryCache};
pub use usage::UsagePattern;
pub use warming::{DataFetcher, WarmingCondition, WarmingReport, WarmingStrategy};
