//! Strategy evaluation and application.
//!
//! The engine keeps the registered [`OptimizationStrategy`] set, decides
//! which strategies currently apply and, on a run, applies their actions one
//! by one against the cache. Only one run may be in flight per engine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::AdaptiveCache;
use crate::error::{CacheError, CacheResult};
use crate::monitor::PerformanceMonitor;
use crate::stats::PerformanceMetrics;
use crate::strategy::{OptimizationAction, OptimizationStrategy};
use crate::warming::WarmingStrategy;

/// An action that could not be applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionFailure {
    pub action: OptimizationAction,
    pub error: String,
}

/// Record of one strategy application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    pub strategy: String,
    pub applied: Vec<OptimizationAction>,
    pub failed: Vec<ActionFailure>,
    pub metrics_before: PerformanceMetrics,
    pub metrics_after: PerformanceMetrics,
    pub timestamp: DateTime<Utc>,
}

impl OptimizationResult {
    /// Change in hit rate, in percentage points.
    pub fn hit_rate_delta(&self) -> f64 {
        self.metrics_after.hit_rate - self.metrics_before.hit_rate
    }

    /// Change in estimated memory, in bytes.
    pub fn memory_delta(&self) -> i64 {
        self.metrics_after.memory_usage as i64 - self.metrics_before.memory_usage as i64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "results", rename_all = "snake_case")]
pub enum OptimizationRun {
    Completed(Vec<OptimizationResult>),
    /// Another run was already in progress.
    Skipped,
}

impl OptimizationRun {
    pub fn results(&self) -> &[OptimizationResult] {
        match self {
            OptimizationRun::Completed(results) => results,
            OptimizationRun::Skipped => &[],
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, OptimizationRun::Skipped)
    }
}

/// Clears the busy flag when a run ends, including on cancellation.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub(crate) struct OptimizationEngine {
    strategies: Mutex<Vec<OptimizationStrategy>>,
    history: Mutex<VecDeque<OptimizationResult>>,
    history_limit: usize,
    action_delay: Duration,
    strategy_delay: Duration,
    running: AtomicBool,
}

impl OptimizationEngine {
    /// Strategies passed here are expected to be validated already, as
    /// [`CacheConfig`](crate::CacheConfig) does when a cache is built.
    pub fn new(
        strategies: Vec<OptimizationStrategy>,
        history_limit: usize,
        action_delay: Duration,
        strategy_delay: Duration,
    ) -> Self {
        Self {
            strategies: Mutex::new(strategies),
            history: Mutex::new(VecDeque::new()),
            history_limit,
            action_delay,
            strategy_delay,
            running: AtomicBool::new(false),
        }
    }

    /// Register a strategy. `warming` is the configured warming strategies
    /// its `warm_cache` actions may name.
    pub fn add_strategy(
        &self,
        strategy: OptimizationStrategy,
        warming: &[WarmingStrategy],
    ) -> CacheResult<()> {
        strategy.validate_with_warming(warming)?;
        let mut strategies = self.strategies.lock();
        if strategies.iter().any(|s| s.name == strategy.name) {
            return Err(CacheError::DuplicateStrategy(strategy.name));
        }
        strategies.push(strategy);
        Ok(())
    }

    pub fn remove_strategy(&self, name: &str) -> CacheResult<OptimizationStrategy> {
        let mut strategies = self.strategies.lock();
        let index = strategies
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| CacheError::StrategyNotFound(name.to_string()))?;
        Ok(strategies.remove(index))
    }

    pub fn toggle_strategy(&self, name: &str, enabled: bool) -> CacheResult<()> {
        let mut strategies = self.strategies.lock();
        let strategy = strategies
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| CacheError::StrategyNotFound(name.to_string()))?;
        strategy.enabled = enabled;
        Ok(())
    }

    pub fn strategies(&self) -> Vec<OptimizationStrategy> {
        self.strategies.lock().clone()
    }

    pub fn history(&self) -> Vec<OptimizationResult> {
        self.history.lock().iter().cloned().collect()
    }

    /// Enabled strategies whose conditions all hold, lowest priority value
    /// first. Ties keep registration order.
    pub fn applicable(
        &self,
        metrics: &PerformanceMetrics,
        monitor: &PerformanceMonitor,
        now: DateTime<Utc>,
    ) -> Vec<OptimizationStrategy> {
        let mut applicable: Vec<OptimizationStrategy> = self
            .strategies
            .lock()
            .iter()
            .filter(|s| s.enabled)
            .filter(|s| {
                s.conditions.iter().all(|c| {
                    let value = match c.window {
                        Some(window) => monitor.windowed_value(c.metric, window, metrics, now),
                        None => c.metric.value(metrics),
                    };
                    c.holds(value)
                })
            })
            .cloned()
            .collect();
        applicable.sort_by_key(|s| s.priority);
        applicable
    }

    /// Apply every applicable strategy in order.
    ///
    /// A failing action is logged and recorded; the remaining actions and
    /// strategies still run.
    pub async fn run(&self, cache: &AdaptiveCache) -> OptimizationRun {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("optimization already in progress, skipping run");
            return OptimizationRun::Skipped;
        }
        let _guard = RunGuard(&self.running);

        let strategies = cache.get_optimization_recommendations();
        let mut results = Vec::with_capacity(strategies.len());

        for (index, strategy) in strategies.into_iter().enumerate() {
            if index > 0 {
                pause(self.strategy_delay).await;
            }

            let metrics_before = cache.get_performance_metrics();
            let mut applied = Vec::new();
            let mut failed = Vec::new();

            for (step, action) in strategy.actions.iter().enumerate() {
                if step > 0 {
                    pause(self.action_delay).await;
                }
                match cache.apply_action(&action.kind).await {
                    Ok(affected) => {
                        info!(
                            strategy = %strategy.name,
                            action = action.kind.name(),
                            affected,
                            "optimization action applied"
                        );
                        applied.push(action.clone());
                    }
                    Err(err) => {
                        warn!(
                            strategy = %strategy.name,
                            action = action.kind.name(),
                            error = %err,
                            "optimization action failed"
                        );
                        failed.push(ActionFailure {
                            action: action.clone(),
                            error: err.to_string(),
                        });
                    }
                }
            }

            let result = OptimizationResult {
                strategy: strategy.name,
                applied,
                failed,
                metrics_before,
                metrics_after: cache.get_performance_metrics(),
                timestamp: cache.now(),
            };
            self.record(result.clone());
            results.push(result);
        }

        OptimizationRun::Completed(results)
    }

    fn record(&self, result: OptimizationResult) {
        let mut history = self.history.lock();
        history.push_back(result);
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::monitor::PerformanceThresholds;
    use crate::stats::AccessCounters;
    use crate::strategy::{
        default_strategies, ActionKind, ComparisonOperator, ImpactLevel, Metric,
        OptimizationCondition,
    };

    fn engine() -> OptimizationEngine {
        OptimizationEngine::new(default_strategies(), 100, Duration::ZERO, Duration::ZERO)
    }

    fn metrics(hit_rate: f64, frequency: f64, now: DateTime<Utc>) -> PerformanceMetrics {
        let mut m = PerformanceMetrics::collect(&AccessCounters::new(), 0, 0, frequency, now);
        m.hit_rate = hit_rate;
        m.miss_rate = 100.0 - hit_rate;
        m.total_requests = 100;
        m
    }

    #[test]
    fn test_registration_rules() {
        let engine = engine();
        assert_eq!(engine.strategies().len(), 4);

        let duplicate = default_strategies().remove(0);
        assert!(matches!(
            engine.add_strategy(duplicate, &[]),
            Err(CacheError::DuplicateStrategy(_))
        ));

        let empty = OptimizationStrategy::new("empty", 9);
        assert!(matches!(
            engine.add_strategy(empty, &[]),
            Err(CacheError::InvalidStrategy { .. })
        ));

        let prefetch = OptimizationStrategy::new("prefetch", 9)
            .when(OptimizationCondition::new(
                Metric::HitRate,
                ComparisonOperator::LessThan,
                70.0,
            ))
            .then(
                ActionKind::WarmCache {
                    strategies: vec!["no-such-warming".to_string()],
                },
                ImpactLevel::High,
            );
        assert!(matches!(
            engine.add_strategy(prefetch.clone(), &[]),
            Err(CacheError::InvalidStrategy { .. })
        ));
        let warming = [WarmingStrategy::new("no-such-warming", ["profile"])];
        assert!(engine.add_strategy(prefetch, &warming).is_ok());
        assert!(engine.remove_strategy("prefetch").is_ok());

        assert!(engine.remove_strategy("reduce-memory").is_ok());
        assert!(matches!(
            engine.remove_strategy("reduce-memory"),
            Err(CacheError::StrategyNotFound(_))
        ));
        assert!(engine.toggle_strategy("missing", false).is_err());
    }

    #[test]
    fn test_applicable_gating() {
        let clock = ManualClock::new();
        let engine = engine();
        let monitor = PerformanceMonitor::new(PerformanceThresholds::default(), 10);

        let healthy = metrics(85.0, 8.0, clock.now());
        assert!(engine.applicable(&healthy, &monitor, clock.now()).is_empty());

        let poor = metrics(50.0, 8.0, clock.now());
        let names: Vec<String> = engine
            .applicable(&poor, &monitor, clock.now())
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["improve-hit-rate"]);

        engine.toggle_strategy("improve-hit-rate", false).unwrap();
        assert!(engine.applicable(&poor, &monitor, clock.now()).is_empty());
    }

    #[test]
    fn test_applicable_orders_by_priority() {
        let clock = ManualClock::new();
        let always = |name: &str, priority| {
            OptimizationStrategy::new(name, priority)
                .when(OptimizationCondition::new(
                    Metric::EntryCount,
                    ComparisonOperator::GreaterOrEqual,
                    0.0,
                ))
                .then(
                    ActionKind::WarmCache {
                        strategies: Vec::new(),
                    },
                    ImpactLevel::Low,
                )
        };
        let engine = OptimizationEngine::new(
            vec![always("late", 5), always("early", 1), always("middle", 3)],
            10,
            Duration::ZERO,
            Duration::ZERO,
        );
        let monitor = PerformanceMonitor::new(PerformanceThresholds::default(), 10);

        let names: Vec<String> = engine
            .applicable(&metrics(90.0, 0.0, clock.now()), &monitor, clock.now())
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_windowed_condition_uses_history() {
        let clock = ManualClock::new();
        let strategy = OptimizationStrategy::new("sustained-misses", 1)
            .when(
                OptimizationCondition::new(Metric::HitRate, ComparisonOperator::LessThan, 70.0)
                    .within(Duration::from_secs(30 * 60)),
            )
            .then(
                ActionKind::WarmCache {
                    strategies: Vec::new(),
                },
                ImpactLevel::Low,
            );
        let engine = OptimizationEngine::new(vec![strategy], 10, Duration::ZERO, Duration::ZERO);

        let mut monitor = PerformanceMonitor::new(PerformanceThresholds::default(), 10);
        monitor.tick(metrics(95.0, 0.0, clock.now()), clock.now());
        clock.advance(Duration::from_secs(60));

        // (95 + 60) / 2 is above the threshold even though the current value is not.
        let current = metrics(60.0, 0.0, clock.now());
        assert!(engine.applicable(&current, &monitor, clock.now()).is_empty());

        let current = metrics(40.0, 0.0, clock.now());
        assert_eq!(engine.applicable(&current, &monitor, clock.now()).len(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let clock = ManualClock::new();
        let engine = OptimizationEngine::new(Vec::new(), 2, Duration::ZERO, Duration::ZERO);

        for i in 0..3 {
            engine.record(OptimizationResult {
                strategy: format!("s{}", i),
                applied: Vec::new(),
                failed: Vec::new(),
                metrics_before: metrics(50.0, 0.0, clock.now()),
                metrics_after: metrics(60.0, 0.0, clock.now()),
                timestamp: clock.now(),
            });
        }

        let history = engine.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].strategy, "s1");
        assert!((history[1].hit_rate_delta() - 10.0).abs() < 1e-9);
    }
}
