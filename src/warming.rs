//! Pre-loading of data a scope is likely to need.
//!
//! A [`WarmingStrategy`] names a set of data types. When its conditions hold
//! for a scope, each missing `"{data_type}:{scope}"` key is fetched through
//! the [`DataFetcher`] collaborator in small batches and stored.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::AdaptiveCache;
use crate::clock::elapsed;
use crate::config::scoped_key;
use crate::entry::Priority;
use crate::error::{CacheError, CacheResult};

/// Source of truth the cache warms from.
#[async_trait]
pub trait DataFetcher: Send + Sync {
    /// Load `data_type` for `scope`. `Ok(None)` means there is nothing to
    /// cache.
    async fn fetch(&self, data_type: &str, scope: &str) -> anyhow::Result<Option<Bytes>>;
}

/// Gate on running a warming strategy for a scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WarmingCondition {
    /// At least `min_interval` since this strategy last warmed the scope.
    TimeElapsed { min_interval: Duration },
    /// The scope's keys have been accessed at least `min_accesses` times.
    UsageThreshold { min_accesses: u64 },
    /// A live entry of `data_type` exists in the scope.
    DependencyPresent { data_type: String },
    /// The named signal has been raised with [`AdaptiveCache::set_signal`].
    ExternalSignal { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmingStrategy {
    pub name: String,
    pub data_types: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub conditions: Vec<WarmingCondition>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl WarmingStrategy {
    pub fn new<I, S>(name: impl Into<String>, data_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            data_types: data_types.into_iter().map(Into::into).collect(),
            priority: Priority::default(),
            conditions: Vec::new(),
            enabled: true,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn when(mut self, condition: WarmingCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarmingFailure {
    pub key: String,
    pub error: String,
}

/// Outcome of one [`AdaptiveCache::warm_cache`] call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WarmingReport {
    pub scope: String,
    /// Strategies whose conditions held and that ran.
    pub strategies: Vec<String>,
    /// Strategies held back by a condition.
    pub gated: Vec<String>,
    pub warmed: Vec<String>,
    /// Keys that already held a live entry.
    pub skipped: Vec<String>,
    /// Keys the fetcher had no data for.
    pub empty: Vec<String>,
    pub failed: Vec<WarmingFailure>,
}

#[derive(Debug, Default)]
struct WarmingState {
    last_warmed: HashMap<(String, String), DateTime<Utc>>,
    signals: HashSet<String>,
    scopes: BTreeSet<String>,
}

pub(crate) struct WarmingController {
    strategies: Vec<WarmingStrategy>,
    fetcher: Option<Arc<dyn DataFetcher>>,
    batch_size: usize,
    batch_delay: Duration,
    state: Mutex<WarmingState>,
}

impl WarmingController {
    pub fn new(
        strategies: Vec<WarmingStrategy>,
        fetcher: Option<Arc<dyn DataFetcher>>,
        batch_size: usize,
        batch_delay: Duration,
    ) -> Self {
        Self {
            strategies,
            fetcher,
            batch_size: batch_size.max(1),
            batch_delay,
            state: Mutex::new(WarmingState::default()),
        }
    }

    pub fn strategies(&self) -> &[WarmingStrategy] {
        &self.strategies
    }

    pub fn set_signal(&self, name: &str, active: bool) {
        let mut state = self.state.lock();
        if active {
            state.signals.insert(name.to_string());
        } else {
            state.signals.remove(name);
        }
    }

    /// Scopes seen by warming or scoped lookups.
    pub fn known_scopes(&self) -> Vec<String> {
        self.state.lock().scopes.iter().cloned().collect()
    }

    pub fn remember_scope(&self, scope: &str) {
        let mut state = self.state.lock();
        if !state.scopes.contains(scope) {
            state.scopes.insert(scope.to_string());
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.last_warmed.clear();
        state.scopes.clear();
    }

    pub async fn warm(
        &self,
        cache: &AdaptiveCache,
        scope: &str,
        strategy: Option<&str>,
    ) -> CacheResult<WarmingReport> {
        let selected: Vec<&WarmingStrategy> = match strategy {
            Some(name) => vec![self
                .strategies
                .iter()
                .find(|s| s.name == name)
                .ok_or_else(|| CacheError::UnknownWarmingStrategy(name.to_string()))?],
            None => self.strategies.iter().filter(|s| s.enabled).collect(),
        };

        self.remember_scope(scope);
        let mut report = WarmingReport {
            scope: scope.to_string(),
            ..WarmingReport::default()
        };

        let Some(fetcher) = self.fetcher.as_ref() else {
            debug!(scope, "no data fetcher configured, nothing to warm");
            return Ok(report);
        };

        for strategy in selected {
            if !self.conditions_hold(strategy, cache, scope) {
                debug!(strategy = %strategy.name, scope, "warming conditions not met");
                report.gated.push(strategy.name.clone());
                continue;
            }

            let mut pending = Vec::new();
            for data_type in &strategy.data_types {
                let key = scoped_key(data_type, scope);
                if cache.contains(&key) {
                    report.skipped.push(key);
                } else {
                    pending.push((data_type.as_str(), key));
                }
            }

            for (index, batch) in pending.chunks(self.batch_size).enumerate() {
                if index > 0 && !self.batch_delay.is_zero() {
                    tokio::time::sleep(self.batch_delay).await;
                }

                let results =
                    join_all(batch.iter().map(|(data_type, _)| fetcher.fetch(data_type, scope)))
                        .await;

                for ((data_type, key), result) in batch.iter().zip(results) {
                    match result {
                        Ok(Some(value)) => {
                            cache.store_warmed(key, value, data_type, scope, strategy.priority);
                            report.warmed.push(key.clone());
                        }
                        Ok(None) => report.empty.push(key.clone()),
                        Err(source) => {
                            let err = CacheError::Fetch {
                                key: key.clone(),
                                source,
                            };
                            warn!(strategy = %strategy.name, error = %err, "warming fetch failed");
                            report.failed.push(WarmingFailure {
                                key: key.clone(),
                                error: err.to_string(),
                            });
                        }
                    }
                }
            }

            self.state
                .lock()
                .last_warmed
                .insert((strategy.name.clone(), scope.to_string()), cache.now());
            report.strategies.push(strategy.name.clone());
        }

        info!(
            scope,
            warmed = report.warmed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "cache warming finished"
        );
        Ok(report)
    }

    fn conditions_hold(
        &self,
        strategy: &WarmingStrategy,
        cache: &AdaptiveCache,
        scope: &str,
    ) -> bool {
        let now = cache.now();
        strategy.conditions.iter().all(|condition| match condition {
            WarmingCondition::TimeElapsed { min_interval } => {
                let state = self.state.lock();
                state
                    .last_warmed
                    .get(&(strategy.name.clone(), scope.to_string()))
                    .map_or(true, |last| elapsed(*last, now) >= *min_interval)
            }
            WarmingCondition::UsageThreshold { min_accesses } => {
                cache.scope_accesses(scope) >= *min_accesses
            }
            WarmingCondition::DependencyPresent { data_type } => {
                cache.contains(&scoped_key(data_type, scope))
            }
            WarmingCondition::ExternalSignal { name } => self.state.lock().signals.contains(name),
        })
    }
}

impl std::fmt::Debug for WarmingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmingController")
            .field("strategies", &self.strategies.len())
            .field("has_fetcher", &self.fetcher.is_some())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}
