//! Engine configuration.
//!
//! Values only. Loading them (files, env) is the embedding process's job;
//! see the CLI for one way to do it.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::RetryPolicy;

/// Upper bound on `pool_size`; well inside what a tokio `Semaphore` can hold.
pub const MAX_POOL_SIZE: usize = 65_536;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Concurrent execution slots.
    pub pool_size: usize,

    pub max_retries: u32,
    pub retry_delay_ms: u64,

    /// 1.0 keeps the retry delay fixed.
    pub retry_multiplier: f64,
    pub max_retry_delay_ms: u64,

    /// Per-attempt limit. `None` lets executors run forever and disables
    /// lease expiry.
    pub execution_timeout_ms: Option<u64>,

    /// Added to the execution timeout to get the lease duration.
    pub lease_grace_ms: u64,

    pub poll_interval_ms: u64,

    /// How long shutdown waits for in-flight executions to report.
    pub shutdown_grace_ms: u64,

    pub stats_window_secs: u64,

    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 50,
            max_retries: 3,
            retry_delay_ms: 5_000,
            retry_multiplier: 1.0,
            max_retry_delay_ms: 300_000,
            execution_timeout_ms: None,
            lease_grace_ms: 30_000,
            poll_interval_ms: 1_000,
            shutdown_grace_ms: 30_000,
            stats_window_secs: 3_600,
            store: StoreConfig::Memory,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    Memory,
    File {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("pool_size must be at least 1")]
    ZeroPoolSize,

    #[error("pool_size must be at most {MAX_POOL_SIZE}, got {0}")]
    PoolSizeTooLarge(usize),

    #[error("retry_multiplier must be a finite number >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("poll_interval_ms must be greater than zero")]
    ZeroPollInterval,

    #[error("execution_timeout_ms must be greater than zero when set")]
    ZeroTimeout,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        if self.pool_size > MAX_POOL_SIZE {
            return Err(ConfigError::PoolSizeTooLarge(self.pool_size));
        }
        if !self.retry_multiplier.is_finite() || self.retry_multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.retry_multiplier));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.execution_timeout_ms == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_delay_ms),
            multiplier: self.retry_multiplier,
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
        }
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_ms.map(Duration::from_millis)
    }

    /// How long a claim stays valid. `None` when there is no execution timeout.
    pub fn lease_duration(&self) -> Option<Duration> {
        self.execution_timeout()
            .map(|t| t.saturating_add(Duration::from_millis(self.lease_grace_ms)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn stats_window(&self) -> Duration {
        Duration::from_secs(self.stats_window_secs)
    }
}
