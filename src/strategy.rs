//! Declarative optimization strategies.
//!
//! A strategy is a set of conditions over [`PerformanceMetrics`] that must
//! all hold, and a list of typed actions to apply when they do. Parameters
//! are checked once, when a strategy is registered.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entry::{CacheEntry, Priority};
use crate::error::{CacheError, CacheResult};
use crate::stats::PerformanceMetrics;
use crate::warming::WarmingStrategy;

/// Metric a condition reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    HitRate,
    MissRate,
    AverageResponseTime,
    MemoryUsage,
    EvictionRate,
    AccessFrequency,
    EntryCount,
}

impl Metric {
    pub fn value(self, metrics: &PerformanceMetrics) -> f64 {
        match self {
            Metric::HitRate => metrics.hit_rate,
            Metric::MissRate => metrics.miss_rate,
            Metric::AverageResponseTime => metrics.average_response_time,
            Metric::MemoryUsage => metrics.memory_usage as f64,
            Metric::EvictionRate => metrics.eviction_rate,
            Metric::AccessFrequency => metrics.average_access_frequency,
            Metric::EntryCount => metrics.entry_count as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    Equal,
}

impl ComparisonOperator {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            ComparisonOperator::LessThan => value < threshold,
            ComparisonOperator::LessOrEqual => value <= threshold,
            ComparisonOperator::GreaterThan => value > threshold,
            ComparisonOperator::GreaterOrEqual => value >= threshold,
            ComparisonOperator::Equal => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::LessOrEqual => "<=",
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::GreaterOrEqual => ">=",
            ComparisonOperator::Equal => "==",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationCondition {
    pub metric: Metric,
    pub operator: ComparisonOperator,
    pub threshold: f64,
    /// When set, the metric is averaged over trend samples inside the window
    /// together with the current value.
    #[serde(default)]
    pub window: Option<Duration>,
}

impl OptimizationCondition {
    pub fn new(metric: Metric, operator: ComparisonOperator, threshold: f64) -> Self {
        Self {
            metric,
            operator,
            threshold,
            window: None,
        }
    }

    pub fn within(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    pub fn holds(&self, value: f64) -> bool {
        self.operator.holds(value, self.threshold)
    }
}

/// Criteria picking the entries an action touches. Unset fields match
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntrySelector {
    pub data_type: Option<String>,
    pub min_access_count: Option<u64>,
    pub max_access_count: Option<u64>,
    pub min_priority: Option<Priority>,
    pub max_priority: Option<Priority>,
    pub min_idle: Option<Duration>,
}

impl EntrySelector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn min_access_count(mut self, count: u64) -> Self {
        self.min_access_count = Some(count);
        self
    }

    pub fn max_access_count(mut self, count: u64) -> Self {
        self.max_access_count = Some(count);
        self
    }

    pub fn min_priority(mut self, priority: Priority) -> Self {
        self.min_priority = Some(priority);
        self
    }

    pub fn max_priority(mut self, priority: Priority) -> Self {
        self.max_priority = Some(priority);
        self
    }

    pub fn min_idle(mut self, idle: Duration) -> Self {
        self.min_idle = Some(idle);
        self
    }

    pub fn matches(&self, entry: &CacheEntry, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.data_type
            .as_deref()
            .map_or(true, |t| entry.data_type() == t)
            && self
                .min_access_count
                .map_or(true, |n| entry.access_count() >= n)
            && self
                .max_access_count
                .map_or(true, |n| entry.access_count() <= n)
            && self.min_priority.map_or(true, |p| entry.priority() >= p)
            && self.max_priority.map_or(true, |p| entry.priority() <= p)
            && self.min_idle.map_or(true, |d| entry.idle_at(now) >= d)
    }
}

/// Expected effect size of an action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Low,
    #[default]
    Medium,
    High,
}

/// A tuning step, with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Scale the TTL of matching live entries.
    AdjustTtl {
        multiplier: f64,
        #[serde(default)]
        selector: EntrySelector,
    },
    /// Set the priority of matching live entries.
    ChangePriority {
        priority: Priority,
        #[serde(default)]
        selector: EntrySelector,
    },
    /// Run the named warming strategies (all when empty) for every known scope.
    WarmCache {
        #[serde(default)]
        strategies: Vec<String>,
    },
    /// Evict the given percentage of matching entries, least useful first.
    EvictEntries {
        percentage: f64,
        #[serde(default)]
        selector: EntrySelector,
    },
    /// Raise the capacity ceiling by `factor`, up to `limit`.
    ResizeCache { factor: f64, limit: usize },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::AdjustTtl { .. } => "adjust_ttl",
            ActionKind::ChangePriority { .. } => "change_priority",
            ActionKind::WarmCache { .. } => "warm_cache",
            ActionKind::EvictEntries { .. } => "evict_entries",
            ActionKind::ResizeCache { .. } => "resize_cache",
        }
    }

    fn validate(&self, strategy: &str) -> CacheResult<()> {
        match self {
            ActionKind::AdjustTtl { multiplier, .. } => {
                if !multiplier.is_finite() || *multiplier <= 0.0 {
                    return Err(CacheError::invalid_strategy(
                        strategy,
                        format!("adjust_ttl multiplier must be positive, got {}", multiplier),
                    ));
                }
            }
            ActionKind::EvictEntries { percentage, .. } => {
                if !percentage.is_finite() || *percentage <= 0.0 || *percentage > 100.0 {
                    return Err(CacheError::invalid_strategy(
                        strategy,
                        format!("evict_entries percentage must be in (0, 100], got {}", percentage),
                    ));
                }
            }
            ActionKind::ResizeCache { factor, limit } => {
                if !factor.is_finite() || *factor <= 1.0 {
                    return Err(CacheError::invalid_strategy(
                        strategy,
                        format!("resize_cache factor must be greater than 1, got {}", factor),
                    ));
                }
                if *limit == 0 {
                    return Err(CacheError::invalid_strategy(
                        strategy,
                        "resize_cache limit must be non-zero",
                    ));
                }
            }
            ActionKind::ChangePriority { .. } | ActionKind::WarmCache { .. } => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationAction {
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default)]
    pub impact: ImpactLevel,
}

impl OptimizationAction {
    pub fn new(kind: ActionKind, impact: ImpactLevel) -> Self {
        Self { kind, impact }
    }
}

/// A named condition → action rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStrategy {
    pub name: String,
    pub conditions: Vec<OptimizationCondition>,
    pub actions: Vec<OptimizationAction>,
    /// Lower values are applied first.
    pub priority: u32,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl OptimizationStrategy {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            conditions: Vec::new(),
            actions: Vec::new(),
            priority,
            enabled: true,
        }
    }

    pub fn when(mut self, condition: OptimizationCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn then(mut self, kind: ActionKind, impact: ImpactLevel) -> Self {
        self.actions.push(OptimizationAction::new(kind, impact));
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn validate(&self) -> CacheResult<()> {
        if self.name.trim().is_empty() {
            return Err(CacheError::invalid_strategy(&self.name, "name is empty"));
        }
        if self.conditions.is_empty() {
            return Err(CacheError::invalid_strategy(&self.name, "no conditions"));
        }
        if self.actions.is_empty() {
            return Err(CacheError::invalid_strategy(&self.name, "no actions"));
        }
        if let Some(c) = self.conditions.iter().find(|c| !c.threshold.is_finite()) {
            return Err(CacheError::invalid_strategy(
                &self.name,
                format!("threshold for {:?} is not finite", c.metric),
            ));
        }
        for action in &self.actions {
            action.kind.validate(&self.name)?;
        }
        Ok(())
    }

    /// [`validate`](Self::validate), and check that every warming strategy a
    /// `warm_cache` action names is configured.
    pub fn validate_with_warming(&self, warming: &[WarmingStrategy]) -> CacheResult<()> {
        self.validate()?;
        for action in &self.actions {
            let ActionKind::WarmCache { strategies } = &action.kind else {
                continue;
            };
            if let Some(unknown) = strategies
                .iter()
                .find(|name| !warming.iter().any(|w| &w.name == *name))
            {
                return Err(CacheError::invalid_strategy(
                    &self.name,
                    format!("warm_cache names unknown warming strategy '{}'", unknown),
                ));
            }
        }
        Ok(())
    }
}

const MIB: f64 = 1024.0 * 1024.0;

/// The built-in strategy set.
pub fn default_strategies() -> Vec<OptimizationStrategy> {
    use ComparisonOperator::{GreaterThan, LessThan};

    vec![
        OptimizationStrategy::new("improve-hit-rate", 1)
            .when(OptimizationCondition::new(Metric::HitRate, LessThan, 70.0))
            .when(OptimizationCondition::new(
                Metric::AccessFrequency,
                GreaterThan,
                5.0,
            ))
            .then(
                ActionKind::AdjustTtl {
                    multiplier: 1.5,
                    selector: EntrySelector::all().min_access_count(2),
                },
                ImpactLevel::Medium,
            )
            .then(
                ActionKind::WarmCache {
                    strategies: Vec::new(),
                },
                ImpactLevel::High,
            ),
        OptimizationStrategy::new("reduce-memory", 2)
            .when(OptimizationCondition::new(
                Metric::MemoryUsage,
                GreaterThan,
                40.0 * MIB,
            ))
            .then(
                ActionKind::ChangePriority {
                    priority: Priority::Low,
                    selector: EntrySelector::all()
                        .max_access_count(1)
                        .max_priority(Priority::Medium),
                },
                ImpactLevel::Low,
            )
            .then(
                ActionKind::AdjustTtl {
                    multiplier: 0.5,
                    selector: EntrySelector::all().max_priority(Priority::High),
                },
                ImpactLevel::Medium,
            )
            .then(
                ActionKind::EvictEntries {
                    percentage: 20.0,
                    selector: EntrySelector::all().max_priority(Priority::High),
                },
                ImpactLevel::High,
            ),
        OptimizationStrategy::new("optimize-response-time", 3)
            .when(OptimizationCondition::new(
                Metric::AverageResponseTime,
                GreaterThan,
                50.0,
            ))
            .then(
                ActionKind::WarmCache {
                    strategies: Vec::new(),
                },
                ImpactLevel::High,
            )
            .then(
                ActionKind::ChangePriority {
                    priority: Priority::High,
                    selector: EntrySelector::all()
                        .min_access_count(5)
                        .max_priority(Priority::Medium),
                },
                ImpactLevel::Medium,
            ),
        OptimizationStrategy::new("reduce-evictions", 4)
            .when(OptimizationCondition::new(
                Metric::EvictionRate,
                GreaterThan,
                5.0,
            ))
            .then(
                ActionKind::ResizeCache {
                    factor: 1.5,
                    limit: 10_000,
                },
                ImpactLevel::High,
            )
            .then(
                ActionKind::ChangePriority {
                    priority: Priority::Critical,
                    selector: EntrySelector::all().min_access_count(10),
                },
                ImpactLevel::Medium,
            ),
    ]
}
