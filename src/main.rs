//! `adaptive-cache` binary.
//!
//! ```bash
//! adaptive-cache simulate --requests 20000 --keys 500
//! adaptive-cache strategies
//! adaptive-cache --config cache.json config
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use adaptive_cache::cli::{Cli, Command, SimulateArgs};
use adaptive_cache::{
    AdaptiveCache, CacheConfig, DataFetcher, InMemorySecondaryCache, Priority, SetOptions,
    WarmingCondition, WarmingStrategy,
};

/// Fetcher standing in for a backing service.
struct SimulatedFetcher;

#[async_trait]
impl DataFetcher for SimulatedFetcher {
    async fn fetch(&self, data_type: &str, scope: &str) -> anyhow::Result<Option<Bytes>> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        match data_type {
            "missing" => Ok(None),
            _ => Ok(Some(Bytes::from(format!(
                r#"{{"type":"{}","scope":"{}"}}"#,
                data_type, scope
            )))),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = match &cli.config {
        Some(path) => CacheConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => CacheConfig::default(),
    };

    match cli.command {
        Command::Simulate(args) => simulate(config, &args).await?,
        Command::Strategies => {
            let cache = AdaptiveCache::new(with_demo_warming(config))?;
            let out = json!({
                "optimization": cache.strategies(),
                "warming": cache.warming_strategies(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::from_default_env().add_directive(cli.log_level.into());

    // Logs go to stderr so stdout stays valid JSON.
    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

/// Add the demo warming strategies unless the configuration brings its own.
fn with_demo_warming(config: CacheConfig) -> CacheConfig {
    if !config.get_warming_strategies().is_empty() {
        return config;
    }
    config
        .data_type_dependencies("portfolio", ["balances"])
        .warming_strategy(
            WarmingStrategy::new("session-start", ["profile", "balances", "portfolio"])
                .priority(Priority::High),
        )
        .warming_strategy(
            WarmingStrategy::new("active-user", ["feed", "notifications"]).when(
                WarmingCondition::UsageThreshold { min_accesses: 10 },
            ),
        )
}

async fn simulate(config: CacheConfig, args: &SimulateArgs) -> Result<()> {
    let config = with_demo_warming(config)
        .action_delay(Duration::ZERO)
        .strategy_delay(Duration::ZERO)
        .warming_batch_delay(Duration::from_millis(10));

    let secondary = Arc::new(InMemorySecondaryCache::new());
    let cache = AdaptiveCache::builder(config)
        .fetcher(Arc::new(SimulatedFetcher))
        .secondary(secondary.clone())
        .build()?;

    info!(requests = args.requests, keys = args.keys, "starting simulation");

    let mut warming = Vec::new();
    for scope in 0..args.scopes {
        warming.push(cache.warm_cache(&format!("0x{:04x}", scope), None).await?);
    }

    let keys = args.keys.max(1);
    let hot = (keys / 10).max(1);
    for i in 0..keys {
        let options = if i < hot {
            SetOptions::new().tag("hot")
        } else {
            SetOptions::new()
        };
        cache.set_with(format!("item:{}", i), format!("value-{}", i), options);
    }

    for i in 0..args.requests {
        // Deterministic skew: the first `hot_percent` of every hundred reads
        // go to the hot keys.
        let key = if (i % 100) < usize::from(args.hot_percent) {
            i % hot
        } else {
            i % (keys * 2)
        };
        if cache.get(&format!("item:{}", key)).is_none() {
            cache.set(format!("item:{}", key), format!("value-{}", key));
        }
    }

    let alerts = cache.run_monitor_tick();
    let reprioritized = cache.analyze_usage_patterns();
    let recommendations: Vec<String> = cache
        .get_optimization_recommendations()
        .into_iter()
        .map(|s| s.name)
        .collect();
    let optimization = if args.no_optimize {
        None
    } else {
        Some(cache.run_optimization().await)
    };

    let out = json!({
        "warming": warming,
        "metrics": cache.get_performance_metrics(),
        "stats": cache.get_cache_stats(),
        "alerts": alerts,
        "reprioritized": reprioritized,
        "recommendations": recommendations,
        "optimization": optimization,
        "secondary_entries": secondary.len(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
