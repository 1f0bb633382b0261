//! Integration tests for the cache library.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use adaptive_cache::{
    ActionKind, AdaptiveCache, AlertKind, AlertSeverity, CacheConfig, CacheError,
    ComparisonOperator, DataFetcher, EntrySelector, ImpactLevel, InMemorySecondaryCache,
    ManualClock, Metric, OptimizationCondition, OptimizationStrategy, Priority, SecondaryCache,
    SetOptions, WarmingCondition, WarmingStrategy,
};
use async_trait::async_trait;
use bytes::Bytes;
use proptest::prelude::*;

fn with_clock(config: CacheConfig) -> (AdaptiveCache, ManualClock) {
    let clock = ManualClock::new();
    let cache = AdaptiveCache::builder(config)
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    (cache, clock)
}

fn always(name: &str) -> OptimizationStrategy {
    OptimizationStrategy::new(name, 1).when(OptimizationCondition::new(
        Metric::EntryCount,
        ComparisonOperator::GreaterOrEqual,
        0.0,
    ))
}

/// Fetcher that records calls and how many ran at once.
#[derive(Default)]
struct RecordingFetcher {
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait]
impl DataFetcher for RecordingFetcher {
    async fn fetch(&self, data_type: &str, scope: &str) -> anyhow::Result<Option<Bytes>> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}", data_type, scope));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match data_type {
            "broken" => anyhow::bail!("upstream unavailable"),
            "absent" => Ok(None),
            _ => Ok(Some(Bytes::from(format!("{}@{}", data_type, scope)))),
        }
    }
}

fn warming_cache(
    config: CacheConfig,
) -> (AdaptiveCache, ManualClock, Arc<RecordingFetcher>) {
    let clock = ManualClock::new();
    let fetcher = Arc::new(RecordingFetcher::default());
    let cache = AdaptiveCache::builder(config)
        .clock(Arc::new(clock.clone()))
        .fetcher(fetcher.clone())
        .build()
        .unwrap();
    (cache, clock, fetcher)
}

#[test]
fn test_basic_workflow() {
    let cache = AdaptiveCache::default();

    assert!(cache.is_empty());
    assert_eq!(cache.len(), 0);

    cache.set("key1", "value1");
    assert_eq!(cache.len(), 1);

    let value = cache.get("key1");
    assert_eq!(&value.unwrap()[..], b"value1");

    assert!(cache.contains("key1"));
    assert!(!cache.contains("nonexistent"));

    assert!(cache.delete("key1"));
    assert!(!cache.contains("key1"));
    assert!(!cache.delete("key1"));

    cache.set("a", "1");
    cache.set("b", "2");
    cache.set("c", "3");
    assert_eq!(cache.len(), 3);
    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn test_entry_valid_until_ttl_elapses() {
    let (cache, clock) = with_clock(CacheConfig::default());

    cache.set_with_ttl("k", "v", Duration::from_millis(1000));
    clock.advance(Duration::from_millis(999));
    assert!(cache.contains("k"));

    clock.advance(Duration::from_millis(1));
    assert!(!cache.contains("k"));
    assert!(cache.get("k").is_none());
}

#[test]
fn test_hit_miss_sequence() {
    let (cache, clock) = with_clock(CacheConfig::default());

    cache.set("k", "v");
    assert!(cache.get("k").is_some());
    assert!(cache.get("k").is_some());

    clock.advance(Duration::from_secs(301));
    assert!(cache.get("k").is_none());

    let metrics = cache.get_performance_metrics();
    assert_eq!(metrics.total_hits, 2);
    assert_eq!(metrics.total_misses, 1);
    assert_eq!(metrics.total_requests, 3);
}

#[test]
fn test_invalidation_cascades_through_chain() {
    let cache = AdaptiveCache::default();

    cache.set("balances:0xa", "b");
    cache.set_with("portfolio:0xa", "p", SetOptions::new().depends_on("balances:0xa"));
    cache.set_with("summary:0xa", "s", SetOptions::new().depends_on("portfolio:0xa"));
    cache.set("balances:0xb", "other");

    let removed = cache.invalidate("balances:0xa");

    assert_eq!(removed, vec!["balances:0xa", "portfolio:0xa", "summary:0xa"]);
    assert!(cache.contains("balances:0xb"));
    assert_eq!(cache.get_cache_stats().invalidations, 3);
}

#[test]
fn test_invalidation_terminates_on_cycle() {
    let cache = AdaptiveCache::default();

    cache.set_with("a", "1", SetOptions::new().depends_on("b"));
    cache.set_with("b", "2", SetOptions::new().depends_on("a"));

    let removed = cache.invalidate("a");
    assert_eq!(removed.len(), 2);
    assert!(cache.is_empty());

    // The keys can be cached again afterwards.
    cache.set("a", "1");
    assert!(cache.contains("a"));
}

#[test]
fn test_invalidate_by_tag() {
    let cache = AdaptiveCache::default();

    cache.set_with("profile:0xa", "p", SetOptions::new().tag("user:0xa"));
    cache.set_with("balances:0xa", "b", SetOptions::new().tag("user:0xa"));
    cache.set_with(
        "portfolio:0xa",
        "f",
        SetOptions::new().depends_on("balances:0xa"),
    );
    cache.set("profile:0xb", "other");

    let mut removed = cache.invalidate_by_tag("user:0xa");
    removed.sort();
    assert_eq!(removed, vec!["balances:0xa", "portfolio:0xa", "profile:0xa"]);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_eviction_prefers_least_useful_entry() {
    let (cache, _clock) = with_clock(CacheConfig::new().max_size(10));

    cache.set_with("vip", "v", SetOptions::new().priority(Priority::High));
    for i in 1..9 {
        cache.set(format!("k{}", i), "v");
        let _ = cache.get(&format!("k{}", i));
    }
    cache.set("cold", "v");
    assert_eq!(cache.len(), 10);

    cache.set("new", "v");

    assert_eq!(cache.len(), 10);
    assert!(!cache.contains("cold"));
    assert!(cache.contains("vip"));
    assert!(cache.contains("new"));
    assert_eq!(cache.get_performance_metrics().eviction_count, 1);
}

#[test]
fn test_eviction_removes_tenth_of_large_store() {
    let (cache, _clock) = with_clock(CacheConfig::new().max_size(50));

    for i in 0..50 {
        cache.set(format!("k{}", i), "v");
    }
    cache.set("overflow", "v");

    assert_eq!(cache.len(), 46);
    assert_eq!(cache.get_performance_metrics().eviction_count, 5);
}

#[test]
fn test_metrics_consistency() {
    let cache = AdaptiveCache::default();

    for i in 0..30 {
        if i % 4 == 0 {
            cache.set(format!("k{}", i), "v");
        }
        let _ = cache.get(&format!("k{}", i));
        let _ = cache.get(&format!("k{}", i / 2));
    }

    let m = cache.get_performance_metrics();
    assert_eq!(m.total_hits + m.total_misses, m.total_requests);
    assert!((m.hit_rate + m.miss_rate - 100.0).abs() < 1e-9);
    assert!(m.hit_rate >= 0.0 && m.hit_rate <= 100.0);
    assert_eq!(m.entry_count, cache.len());
}

#[test]
fn test_alerts_are_deduplicated() {
    let (cache, clock) = with_clock(CacheConfig::default());

    cache.set("a", "1");
    let _ = cache.get("a");
    let _ = cache.get("missing");

    let alerts = cache.run_monitor_tick();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::LowHitRate);
    assert_eq!(alerts[0].severity, AlertSeverity::High);

    clock.advance(Duration::from_secs(4 * 60));
    assert!(cache.run_monitor_tick().is_empty());

    clock.advance(Duration::from_secs(60));
    assert_eq!(cache.run_monitor_tick().len(), 1);
    assert_eq!(cache.alerts().len(), 2);
    assert_eq!(cache.trend_summary().samples, 3);

    let history = cache.trend_history();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|m| (m.hit_rate - 50.0).abs() < 1e-9));
}

#[test]
fn test_no_hit_rate_alert_without_traffic() {
    let cache = AdaptiveCache::default();
    assert!(cache.run_monitor_tick().is_empty());
}

#[test]
fn test_adaptive_ttl_scaling() {
    let (cache, clock) = with_clock(CacheConfig::default());

    for _ in 0..15 {
        let _ = cache.get("user:hot");
    }
    cache.set("user:hot", "v");
    assert_eq!(
        cache.peek_entry("user:hot").unwrap().ttl(),
        Duration::from_millis(600_000)
    );

    let _ = cache.get("user:cold");
    clock.advance(Duration::from_secs(2 * 60 * 60));
    cache.analyze_usage_patterns();
    cache.set("user:cold", "v");
    assert_eq!(
        cache.peek_entry("user:cold").unwrap().ttl(),
        Duration::from_millis(150_000)
    );

    cache.set("user:new", "v");
    assert_eq!(
        cache.peek_entry("user:new").unwrap().ttl(),
        Duration::from_millis(300_000)
    );
}

#[test]
fn test_analysis_derives_priority() {
    let (cache, _clock) = with_clock(CacheConfig::default());

    cache.set("hot", "v");
    cache.set("warm", "v");
    for _ in 0..25 {
        let _ = cache.get("hot");
    }
    for _ in 0..5 {
        let _ = cache.get("warm");
    }

    cache.analyze_usage_patterns();

    assert_eq!(cache.peek_entry("hot").unwrap().priority(), Priority::Critical);
    assert_eq!(cache.peek_entry("warm").unwrap().priority(), Priority::Medium);
    let stats = cache.get_cache_stats();
    assert_eq!(stats.hottest_keys[0].0, "hot");
}

#[tokio::test]
async fn test_optimization_not_applied_when_healthy() {
    let config = CacheConfig::new().action_delay(Duration::ZERO).build();
    let (cache, _clock) = with_clock(config);

    cache.set("hot", "v");
    for _ in 0..34 {
        let _ = cache.get("hot");
    }
    for _ in 0..3 {
        let _ = cache.get("cold1");
        let _ = cache.get("cold2");
    }
    assert!((cache.get_performance_metrics().hit_rate - 85.0).abs() < 1e-9);

    assert!(cache.get_optimization_recommendations().is_empty());
    let run = cache.run_optimization().await;
    assert!(run.results().is_empty());
    assert!(cache.optimization_history().is_empty());
}

#[tokio::test]
async fn test_optimization_applied_on_low_hit_rate() {
    let config = CacheConfig::new().action_delay(Duration::ZERO).build();
    let (cache, _clock) = with_clock(config);

    cache.set("hot", "v");
    for _ in 0..20 {
        let _ = cache.get("hot");
        let _ = cache.get("cold");
    }
    assert!((cache.get_performance_metrics().hit_rate - 50.0).abs() < 1e-9);

    let names: Vec<String> = cache
        .get_optimization_recommendations()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["improve-hit-rate"]);

    let run = cache.run_optimization().await;
    assert_eq!(run.results().len(), 1);
    let result = &run.results()[0];
    assert_eq!(result.strategy, "improve-hit-rate");
    assert_eq!(result.applied.len(), 2);
    assert!(result.failed.is_empty());

    assert_eq!(
        cache.peek_entry("hot").unwrap().ttl(),
        Duration::from_secs(450)
    );
    assert_eq!(cache.optimization_history().len(), 1);
}

#[tokio::test]
async fn test_failed_action_is_recorded_and_run_continues() {
    let strategy = always("grow")
        .then(
            ActionKind::ResizeCache {
                factor: 2.0,
                limit: 10,
            },
            ImpactLevel::High,
        )
        .then(
            ActionKind::ChangePriority {
                priority: Priority::Low,
                selector: EntrySelector::all(),
            },
            ImpactLevel::Low,
        );
    let config = CacheConfig::new()
        .max_size(10)
        .optimization_strategies(vec![strategy])
        .action_delay(Duration::ZERO)
        .build();
    let (cache, _clock) = with_clock(config);
    cache.set("k", "v");

    let run = cache.run_optimization().await;
    let result = &run.results()[0];

    assert_eq!(result.failed.len(), 1);
    assert!(result.failed[0].error.contains("capacity already at limit"));
    assert_eq!(result.applied.len(), 1);
    assert_eq!(cache.peek_entry("k").unwrap().priority(), Priority::Low);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_optimization_is_skipped() {
    let strategy = always("slow")
        .then(
            ActionKind::AdjustTtl {
                multiplier: 2.0,
                selector: EntrySelector::all(),
            },
            ImpactLevel::Low,
        )
        .then(
            ActionKind::ChangePriority {
                priority: Priority::High,
                selector: EntrySelector::all(),
            },
            ImpactLevel::Low,
        );
    let config = CacheConfig::new()
        .optimization_strategies(vec![strategy])
        .action_delay(Duration::from_millis(200))
        .build();
    let cache = AdaptiveCache::new(config).unwrap();

    let second = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.run_optimization().await
    };
    let (first, second) = tokio::join!(cache.run_optimization(), second);

    assert_eq!(first.results().len(), 1);
    assert!(second.is_skipped());

    // The flag is released once the first run finishes.
    assert!(!cache.run_optimization().await.is_skipped());
}

#[test]
fn test_strategy_management() {
    let cache = AdaptiveCache::default();
    assert_eq!(cache.strategies().len(), 4);

    assert!(matches!(
        cache.add_strategy(OptimizationStrategy::new("empty", 1)),
        Err(CacheError::InvalidStrategy { .. })
    ));

    let custom = always("custom").then(
        ActionKind::EvictEntries {
            percentage: 10.0,
            selector: EntrySelector::all().max_priority(Priority::Low),
        },
        ImpactLevel::Medium,
    );
    cache.add_strategy(custom.clone()).unwrap();
    assert!(matches!(
        cache.add_strategy(custom),
        Err(CacheError::DuplicateStrategy(_))
    ));

    cache.toggle_strategy("custom", false).unwrap();
    assert!(cache.get_optimization_recommendations().is_empty());
    cache.toggle_strategy("custom", true).unwrap();
    assert_eq!(cache.get_optimization_recommendations().len(), 1);

    cache.remove_strategy("custom").unwrap();
    assert!(matches!(
        cache.remove_strategy("custom"),
        Err(CacheError::StrategyNotFound(_))
    ));
}

#[test]
fn test_strategy_loaded_from_json_config() {
    let config = CacheConfig::from_json(
        r#"{
            "max_size": 100,
            "optimization_strategies": [{
                "name": "trim-idle",
                "priority": 1,
                "conditions": [
                    {"metric": "entry_count", "operator": "greater_than", "threshold": 2}
                ],
                "actions": [
                    {"type": "evict_entries", "percentage": 50, "impact": "high"}
                ]
            }]
        }"#,
    )
    .unwrap();
    let cache = AdaptiveCache::new(config).unwrap();

    assert!(cache.get_optimization_recommendations().is_empty());
    for i in 0..3 {
        cache.set(format!("k{}", i), "v");
    }
    let recommended = cache.get_optimization_recommendations();
    assert_eq!(recommended.len(), 1);
    assert_eq!(recommended[0].name, "trim-idle");
}

#[tokio::test(start_paused = true)]
async fn test_warming_fetches_in_batches() {
    let types = ["a", "b", "c", "d", "e", "f", "g"];
    let config = CacheConfig::new()
        .warming_strategy(WarmingStrategy::new("all", types).priority(Priority::High))
        .build();
    let (cache, _clock, fetcher) = warming_cache(config);

    let report = cache.warm_cache("0x1", None).await.unwrap();

    assert_eq!(report.warmed.len(), 7);
    assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 5);
    assert_eq!(
        cache.get("c:0x1"),
        Some(Bytes::from("c@0x1"))
    );
    assert_eq!(cache.peek_entry("a:0x1").unwrap().priority(), Priority::High);

    let again = cache.warm_cache("0x1", None).await.unwrap();
    assert!(again.warmed.is_empty());
    assert_eq!(again.skipped.len(), 7);
    assert_eq!(fetcher.calls.lock().unwrap().len(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_warming_reports_failures_and_empty_results() {
    let config = CacheConfig::new()
        .warming_strategy(WarmingStrategy::new("mixed", ["profile", "broken", "absent"]))
        .build();
    let (cache, _clock, _fetcher) = warming_cache(config);

    let report = cache.warm_cache("0x1", Some("mixed")).await.unwrap();

    assert_eq!(report.warmed, vec!["profile:0x1"]);
    assert_eq!(report.empty, vec!["absent:0x1"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].key, "broken:0x1");
    assert!(report.failed[0].error.contains("upstream unavailable"));

    assert!(matches!(
        cache.warm_cache("0x1", Some("nope")).await,
        Err(CacheError::UnknownWarmingStrategy(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_warmed_entries_carry_dependencies() {
    let config = CacheConfig::new()
        .data_type_dependencies("portfolio", ["balances"])
        .data_type_ttl("portfolio", Duration::from_secs(30))
        .warming_strategy(WarmingStrategy::new("session", ["balances", "portfolio"]))
        .build();
    let (cache, _clock, _fetcher) = warming_cache(config);

    cache.warm_cache("0xa", None).await.unwrap();
    assert_eq!(
        cache.peek_entry("portfolio:0xa").unwrap().ttl(),
        Duration::from_secs(30)
    );

    let removed = cache.invalidate("balances:0xa");
    assert_eq!(removed, vec!["balances:0xa", "portfolio:0xa"]);
}

#[tokio::test(start_paused = true)]
async fn test_warming_conditions() {
    let config = CacheConfig::new()
        .warming_strategy(
            WarmingStrategy::new("busy", ["feed"])
                .when(WarmingCondition::UsageThreshold { min_accesses: 3 }),
        )
        .warming_strategy(
            WarmingStrategy::new("login", ["profile"])
                .when(WarmingCondition::ExternalSignal {
                    name: "login".to_string(),
                })
                .when(WarmingCondition::TimeElapsed {
                    min_interval: Duration::from_secs(60),
                }),
        )
        .build();
    let (cache, clock, _fetcher) = warming_cache(config);

    let report = cache.warm_cache("0xa", None).await.unwrap();
    assert_eq!(report.gated, vec!["busy", "login"]);
    assert!(report.warmed.is_empty());

    for _ in 0..3 {
        let _ = cache.get_scoped("balances", "0xa");
    }
    cache.set_signal("login", true);
    let report = cache.warm_cache("0xa", None).await.unwrap();
    assert_eq!(report.warmed, vec!["feed:0xa", "profile:0xa"]);

    cache.invalidate("profile:0xa");
    let report = cache.warm_cache("0xa", Some("login")).await.unwrap();
    assert_eq!(report.gated, vec!["login"]);

    clock.advance(Duration::from_secs(60));
    let report = cache.warm_cache("0xa", Some("login")).await.unwrap();
    assert_eq!(report.warmed, vec!["profile:0xa"]);
}

#[tokio::test(start_paused = true)]
async fn test_optimizer_warms_known_scopes() {
    let strategy = always("prefetch").then(
        ActionKind::WarmCache {
            strategies: vec!["profiles".to_string()],
        },
        ImpactLevel::High,
    );
    let config = CacheConfig::new()
        .optimization_strategies(vec![strategy])
        .warming_strategy(WarmingStrategy::new("profiles", ["profile"]))
        .build();
    let (cache, _clock, _fetcher) = warming_cache(config);

    let _ = cache.get_scoped("profile", "0xa");
    let _ = cache.get_scoped("profile", "0xb");

    let run = cache.run_optimization().await;
    assert_eq!(run.results()[0].applied.len(), 1);
    assert!(cache.contains("profile:0xa"));
    assert!(cache.contains("profile:0xb"));
}

fn with_secondary(
    config: CacheConfig,
) -> (AdaptiveCache, ManualClock, Arc<InMemorySecondaryCache>) {
    let clock = ManualClock::new();
    let secondary = Arc::new(InMemorySecondaryCache::new());
    let cache = AdaptiveCache::builder(config)
        .clock(Arc::new(clock.clone()))
        .secondary(secondary.clone())
        .build()
        .unwrap();
    (cache, clock, secondary)
}

#[test]
fn test_secondary_tier_serves_evicted_entry() {
    let (cache, _clock, _secondary) = with_secondary(CacheConfig::new().max_size(10));

    cache.set_with("cold", "v", SetOptions::new().priority(Priority::Low));
    for i in 0..9 {
        cache.set(format!("k{}", i), "v");
    }
    cache.set("overflow", "v");
    assert!(!cache.contains("cold"));

    assert_eq!(cache.get("cold"), Some(Bytes::from("v")));
    let metrics = cache.get_performance_metrics();
    assert_eq!(metrics.total_hits, 1);
    assert_eq!(metrics.total_misses, 0);
    assert_eq!(cache.get_cache_stats().secondary_hits, 1);
}

#[test]
fn test_invalidation_clears_secondary_tier() {
    let (cache, _clock, secondary) = with_secondary(CacheConfig::default());

    cache.set("a", "1");
    cache.set_with("b", "2", SetOptions::new().depends_on("a"));
    cache.set_with("c", "3", SetOptions::new().depends_on("b"));
    assert_eq!(secondary.len(), 3);

    assert_eq!(cache.invalidate("a"), vec!["a", "b", "c"]);

    assert!(cache.get("a").is_none());
    assert!(cache.get("b").is_none());
    assert!(cache.get("c").is_none());
    assert!(secondary.is_empty());
    assert_eq!(cache.get_cache_stats().secondary_hits, 0);
}

#[test]
fn test_invalidation_reaches_evicted_dependent() {
    let (cache, _clock, secondary) = with_secondary(CacheConfig::new().max_size(2));

    cache.set_with("a", "1", SetOptions::new().priority(Priority::High));
    cache.set_with(
        "b",
        "2",
        SetOptions::new().depends_on("a").priority(Priority::Low),
    );
    cache.set("c", "3");
    assert!(!cache.contains("b"));

    assert_eq!(cache.invalidate("a"), vec!["a"]);
    assert!(secondary.get("b").is_none());
    assert!(cache.get("b").is_none());
}

#[test]
fn test_promoted_entry_keeps_dependencies() {
    let (cache, _clock, _secondary) = with_secondary(CacheConfig::new().max_size(2));

    cache.set_with("a", "1", SetOptions::new().priority(Priority::High));
    cache.set_with(
        "b",
        "2",
        SetOptions::new()
            .depends_on("a")
            .priority(Priority::Low)
            .tag("wallet"),
    );
    cache.set("c", "3");
    assert!(!cache.contains("b"));

    assert_eq!(cache.get("b"), Some(Bytes::from("2")));
    let promoted = cache.peek_entry("b").unwrap();
    assert!(promoted.dependencies().contains("a"));
    assert!(promoted.tags().contains("wallet"));

    assert_eq!(cache.invalidate("a"), vec!["a", "b"]);
    assert!(!cache.contains("b"));
    assert!(cache.get("b").is_none());
}

#[test]
fn test_expired_entry_not_served_from_secondary() {
    let (cache, clock, secondary) = with_secondary(CacheConfig::default());

    cache.set_with_ttl("read", "v", Duration::from_secs(1));
    cache.set_with_ttl("swept", "v", Duration::from_secs(1));
    clock.advance(Duration::from_secs(2));

    assert!(cache.get("read").is_none());
    assert!(secondary.get("read").is_none());
    assert!(cache.get("read").is_none());

    assert_eq!(cache.cleanup_expired(), 1);
    assert!(secondary.is_empty());
    assert!(cache.get("swept").is_none());

    let metrics = cache.get_performance_metrics();
    assert_eq!(metrics.total_hits, 0);
    assert_eq!(metrics.total_misses, 3);
}

#[test]
fn test_expired_dependent_is_not_promoted() {
    let (cache, clock, secondary) = with_secondary(CacheConfig::default());

    cache.set("a", "1");
    cache.set_with(
        "b",
        "2",
        SetOptions::new().depends_on("a").ttl(Duration::from_secs(1)),
    );
    clock.advance(Duration::from_secs(2));

    assert!(cache.get("b").is_none());
    assert!(secondary.get("b").is_none());
    assert_eq!(cache.invalidate("a"), vec!["a"]);
    assert!(!cache.contains("b"));
}

#[test]
fn test_delete_clears_secondary_tier() {
    let (cache, _clock, secondary) = with_secondary(CacheConfig::default());

    cache.set("shared", "v");
    assert!(cache.delete("shared"));

    assert!(secondary.is_empty());
    assert!(cache.get("shared").is_none());
}

#[test]
fn test_concurrent_reads_and_writes() {
    let cache = AdaptiveCache::new(CacheConfig::new().max_size(500)).unwrap();

    for i in 0..100 {
        cache.set(format!("key_{}", i), format!("value_{}", i));
    }

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    let key = format!("key_{}", (t * 37 + i) % 700);
                    if i % 3 == 0 {
                        cache.set(key, "v");
                    } else if i % 11 == 0 {
                        cache.invalidate(&key);
                    } else {
                        let _ = cache.get(&key);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(cache.len() <= 500);
    let m = cache.get_performance_metrics();
    assert_eq!(m.total_hits + m.total_misses, m.total_requests);
}

#[test]
fn test_binary_values() {
    let cache = AdaptiveCache::default();

    let binary_data: Vec<u8> = (0..=255).collect();
    cache.set("binary", binary_data.clone());

    assert_eq!(cache.get("binary").unwrap().to_vec(), binary_data);
}

proptest! {
    #[test]
    fn prop_size_never_exceeds_max(
        max_size in 1usize..40,
        keys in prop::collection::vec(0u16..120, 0..300),
    ) {
        let cache = AdaptiveCache::new(CacheConfig::new().max_size(max_size)).unwrap();

        for k in keys {
            let key = format!("k{}", k);
            let before = cache.len();
            let is_new = !cache.contains(&key);
            cache.set(key, "v");
            let after = cache.len();

            prop_assert!(after <= max_size);
            if is_new && before == max_size {
                let victims = (before / 10).max(1);
                prop_assert_eq!(after, before - victims + 1);
            }
        }
    }
}
