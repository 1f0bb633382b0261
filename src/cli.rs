//! Command-line interface definitions.
//!
//! This module defines the CLI structure for the `adaptive-cache` binary
//! using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::Level;

/// Adaptive cache driver.
///
/// Runs a synthetic workload against the cache and prints what the engine
/// observed and tuned, or inspects the configured strategies.
#[derive(Parser, Debug)]
#[command(name = "adaptive-cache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "CACHE_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: Level,

    /// Emit logs as JSON.
    #[arg(long, env = "CACHE_LOG_JSON", global = true)]
    pub log_json: bool,

    /// JSON configuration file. Missing fields use the defaults.
    #[arg(long, short = 'c', env = "CACHE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a synthetic workload and print metrics, alerts and optimizations.
    Simulate(SimulateArgs),

    /// Print the optimization and warming strategies as JSON.
    Strategies,

    /// Print the effective configuration as JSON.
    Config,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct SimulateArgs {
    /// Number of reads to issue.
    #[arg(long, default_value_t = 10_000)]
    pub requests: usize,

    /// Number of distinct keys per data type.
    #[arg(long, default_value_t = 200)]
    pub keys: usize,

    /// Number of scopes to warm before the workload.
    #[arg(long, default_value_t = 3)]
    pub scopes: usize,

    /// Percentage of reads that go to the hottest tenth of the keys.
    #[arg(long, default_value_t = 80)]
    pub hot_percent: u8,

    /// Skip the optimization pass at the end.
    #[arg(long)]
    pub no_optimize: bool,
}
