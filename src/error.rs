//! Error types for the adaptive cache.
//!
//! Cache reads and writes never fail: capacity pressure is resolved by
//! eviction and collaborator problems degrade to "entry absent". Errors are
//! reserved for configuration mistakes, strategy management and the
//! collaborator boundary.

use std::io;

use thiserror::Error;

/// The main error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A strategy failed validation when it was registered.
    #[error("invalid strategy '{name}': {reason}")]
    InvalidStrategy { name: String, reason: String },

    /// A strategy with the same name is already registered.
    #[error("strategy already registered: '{0}'")]
    DuplicateStrategy(String),

    /// No optimization strategy is registered under this name.
    #[error("strategy not found: '{0}'")]
    StrategyNotFound(String),

    /// No warming strategy is configured under this name.
    #[error("unknown warming strategy: '{0}'")]
    UnknownWarmingStrategy(String),

    /// The cache configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A resize was requested but the capacity is already at its ceiling.
    #[error("capacity already at limit: {current} (limit: {limit})")]
    CapacityLimit { current: usize, limit: usize },

    /// The data-fetch collaborator failed for a key.
    #[error("fetch failed for '{key}': {source}")]
    Fetch {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// Background tasks were requested outside a tokio runtime.
    #[error("no tokio runtime available: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),

    /// An I/O error occurred (loading configuration, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A JSON document could not be parsed or produced.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    pub(crate) fn invalid_strategy(name: &str, reason: impl Into<String>) -> Self {
        CacheError::InvalidStrategy {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// A specialized Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
