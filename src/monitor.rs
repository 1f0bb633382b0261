//! Performance monitoring: trend history, threshold alerts and trend
//! summaries.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::elapsed;
use crate::stats::PerformanceMetrics;
use crate::strategy::Metric;

/// Two alerts of the same kind are never raised closer together than this.
pub const ALERT_DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);
/// Alerts and samples older than this are pruned.
pub const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Relative change below which a trend counts as stable.
const STABLE_BAND: f64 = 0.05;

/// Limits the monitor checks each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceThresholds {
    /// Percent.
    pub min_hit_rate: f64,
    /// Milliseconds.
    pub max_response_time: f64,
    /// Bytes.
    pub max_memory_usage: u64,
    /// Percent of writes that evicted.
    pub max_eviction_rate: f64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            min_hit_rate: 70.0,
            max_response_time: 100.0,
            max_memory_usage: 50 * 1024 * 1024,
            max_eviction_rate: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowHitRate,
    HighResponseTime,
    HighMemoryUsage,
    HighEvictionRate,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertKind::LowHitRate => "low_hit_rate",
            AlertKind::HighResponseTime => "high_response_time",
            AlertKind::HighMemoryUsage => "high_memory_usage",
            AlertKind::HighEvictionRate => "high_eviction_rate",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTrend {
    pub metric: Metric,
    /// Mean over the older half of the history.
    pub earlier: f64,
    /// Mean over the newer half of the history.
    pub recent: f64,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub samples: usize,
    pub trends: Vec<MetricTrend>,
}

#[derive(Debug)]
pub struct PerformanceMonitor {
    thresholds: PerformanceThresholds,
    history: VecDeque<PerformanceMetrics>,
    capacity: usize,
    alerts: Vec<PerformanceAlert>,
}

impl PerformanceMonitor {
    pub fn new(thresholds: PerformanceThresholds, capacity: usize) -> Self {
        Self {
            thresholds,
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            alerts: Vec::new(),
        }
    }

    pub fn thresholds(&self) -> &PerformanceThresholds {
        &self.thresholds
    }

    pub fn set_thresholds(&mut self, thresholds: PerformanceThresholds) {
        self.thresholds = thresholds;
    }

    /// Record a sample, raise alerts for breached thresholds and prune old
    /// data. Returns only the alerts raised by this tick.
    pub fn tick(&mut self, metrics: PerformanceMetrics, now: DateTime<Utc>) -> Vec<PerformanceAlert> {
        self.prune(now);

        let mut raised = Vec::new();
        for candidate in self.breaches(&metrics, now) {
            if self.recently_raised(candidate.kind, now) {
                continue;
            }
            warn!(
                kind = %candidate.kind,
                severity = ?candidate.severity,
                value = candidate.value,
                threshold = candidate.threshold,
                "{}",
                candidate.message
            );
            self.alerts.push(candidate.clone());
            raised.push(candidate);
        }

        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(metrics);

        raised
    }

    fn breaches(&self, m: &PerformanceMetrics, now: DateTime<Utc>) -> Vec<PerformanceAlert> {
        let t = &self.thresholds;
        let mut out = Vec::new();

        if m.total_requests > 0 && m.hit_rate < t.min_hit_rate {
            let severity = escalate(m.hit_rate < t.min_hit_rate * 0.5);
            out.push(alert(
                AlertKind::LowHitRate,
                severity,
                m.hit_rate,
                t.min_hit_rate,
                format!("hit rate {:.1}% below {:.1}%", m.hit_rate, t.min_hit_rate),
                now,
            ));
        }

        if m.average_response_time > t.max_response_time {
            let severity = escalate(m.average_response_time > t.max_response_time * 2.0);
            out.push(alert(
                AlertKind::HighResponseTime,
                severity,
                m.average_response_time,
                t.max_response_time,
                format!(
                    "average response time {:.2}ms above {:.2}ms",
                    m.average_response_time, t.max_response_time
                ),
                now,
            ));
        }

        let max_memory = t.max_memory_usage as f64;
        if m.memory_usage as f64 > max_memory {
            let severity = escalate(m.memory_usage as f64 > max_memory * 1.5);
            out.push(alert(
                AlertKind::HighMemoryUsage,
                severity,
                m.memory_usage as f64,
                max_memory,
                format!(
                    "memory usage {} bytes above {} bytes",
                    m.memory_usage, t.max_memory_usage
                ),
                now,
            ));
        }

        if m.eviction_rate > t.max_eviction_rate {
            let severity = escalate(m.eviction_rate > t.max_eviction_rate * 2.0);
            out.push(alert(
                AlertKind::HighEvictionRate,
                severity,
                m.eviction_rate,
                t.max_eviction_rate,
                format!(
                    "eviction rate {:.1}% above {:.1}%",
                    m.eviction_rate, t.max_eviction_rate
                ),
                now,
            ));
        }

        out
    }

    fn recently_raised(&self, kind: AlertKind, now: DateTime<Utc>) -> bool {
        self.alerts
            .iter()
            .rev()
            .find(|a| a.kind == kind)
            .is_some_and(|a| elapsed(a.raised_at, now) < ALERT_DEDUP_WINDOW)
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        self.alerts
            .retain(|a| elapsed(a.raised_at, now) <= RETENTION);
        while self
            .history
            .front()
            .is_some_and(|s| elapsed(s.last_updated, now) > RETENTION)
        {
            self.history.pop_front();
        }
    }

    /// Mean of `current` and every sample taken within `window` of `now`.
    pub fn windowed_value(
        &self,
        metric: Metric,
        window: Duration,
        current: &PerformanceMetrics,
        now: DateTime<Utc>,
    ) -> f64 {
        let mut sum = metric.value(current);
        let mut count = 1usize;
        for sample in self
            .history
            .iter()
            .filter(|s| elapsed(s.last_updated, now) <= window)
        {
            sum += metric.value(sample);
            count += 1;
        }
        sum / count as f64
    }

    /// Compare the older and newer halves of the history.
    pub fn trend_summary(&self) -> TrendSummary {
        let samples = self.history.len();
        let tracked = [
            (Metric::HitRate, true),
            (Metric::AverageResponseTime, false),
            (Metric::MemoryUsage, false),
            (Metric::EvictionRate, false),
        ];

        let mid = samples / 2;
        let trends = if samples < 2 {
            Vec::new()
        } else {
            tracked
                .into_iter()
                .map(|(metric, higher_is_better)| {
                    let earlier = mean(self.history.iter().take(mid), metric);
                    let recent = mean(self.history.iter().skip(mid), metric);
                    MetricTrend {
                        metric,
                        earlier,
                        recent,
                        direction: direction(earlier, recent, higher_is_better),
                    }
                })
                .collect()
        };

        TrendSummary { samples, trends }
    }

    pub fn alerts(&self) -> &[PerformanceAlert] {
        &self.alerts
    }

    pub fn history(&self) -> impl Iterator<Item = &PerformanceMetrics> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.alerts.clear();
    }
}

fn escalate(critical: bool) -> AlertSeverity {
    if critical {
        AlertSeverity::Critical
    } else {
        AlertSeverity::High
    }
}

fn alert(
    kind: AlertKind,
    severity: AlertSeverity,
    value: f64,
    threshold: f64,
    message: String,
    raised_at: DateTime<Utc>,
) -> PerformanceAlert {
    PerformanceAlert {
        kind,
        severity,
        value,
        threshold,
        message,
        raised_at,
    }
}

fn mean<'a>(samples: impl Iterator<Item = &'a PerformanceMetrics>, metric: Metric) -> f64 {
    let (sum, count) = samples.fold((0.0, 0usize), |(s, c), m| (s + metric.value(m), c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn direction(earlier: f64, recent: f64, higher_is_better: bool) -> TrendDirection {
    let scale = earlier.abs().max(f64::EPSILON);
    let change = (recent - earlier) / scale;
    if change.abs() < STABLE_BAND {
        TrendDirection::Stable
    } else if (change > 0.0) == higher_is_better {
        TrendDirection::Improving
    } else {
        TrendDirection::Degrading
    }
}
