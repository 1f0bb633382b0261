//! Periodic background work.
//!
//! Each job runs as its own tokio task on a fixed interval and talks to the
//! cache only through its public API.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::cache::AdaptiveCache;
use crate::error::CacheResult;

/// Handles to the running background tasks.
///
/// Dropping the value aborts every task.
#[derive(Debug)]
pub struct BackgroundTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    /// Names of the jobs that were started.
    pub fn jobs(&self) -> Vec<&'static str> {
        self.handles.iter().map(|(name, _)| *name).collect()
    }

    /// Abort every task and wait until they have stopped.
    pub async fn shutdown(mut self) {
        for (_, handle) in &self.handles {
            handle.abort();
        }
        for (name, handle) in self.handles.drain(..) {
            let _ = handle.await;
            debug!(job = name, "background task stopped");
        }
        info!("background tasks stopped");
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for (_, handle) in &self.handles {
            handle.abort();
        }
    }
}

pub(crate) fn spawn(cache: AdaptiveCache) -> CacheResult<BackgroundTasks> {
    let runtime = Handle::try_current()?;
    let config = cache.config().clone();
    let mut handles = Vec::with_capacity(4);

    let c = cache.clone();
    handles.push(every(&runtime, "monitor", config.monitor_interval, move || {
        let c = c.clone();
        async move {
            c.run_monitor_tick();
        }
    }));

    let c = cache.clone();
    handles.push(every(
        &runtime,
        "optimization",
        config.optimization_interval,
        move || {
            let c = c.clone();
            async move {
                c.run_optimization().await;
            }
        },
    ));

    let c = cache.clone();
    handles.push(every(&runtime, "analysis", config.analysis_interval, move || {
        let c = c.clone();
        async move {
            c.analyze_usage_patterns();
        }
    }));

    if config.background_cleanup {
        let c = cache;
        handles.push(every(&runtime, "cleanup", config.cleanup_interval, move || {
            let c = c.clone();
            async move {
                c.cleanup_expired();
            }
        }));
    }

    info!(jobs = handles.len(), "background tasks started");
    Ok(BackgroundTasks { handles })
}

/// Run `job` every `period`, starting one period from now.
fn every<F, Fut>(
    runtime: &Handle,
    name: &'static str,
    period: Duration,
    mut job: F,
) -> (&'static str, JoinHandle<()>)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = runtime.spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            debug!(job = name, "running background job");
            job().await;
        }
    });
    (name, handle)
}
