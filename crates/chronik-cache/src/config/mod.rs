//! Cache configuration.
//!
//! All knobs have compiled defaults and deserialize from the embedding
//! application's config file; absent fields fall back field-by-field, so
//! a partial `[cache]` section is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry envelope settings shared by every external operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverOptions {
    /// Attempts per operation before the last error surfaces. Defaults to `3`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between attempts in milliseconds. Defaults to `1500`.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Whether the delay doubles per attempt. Defaults to `true`.
    #[serde(default = "default_exponential_backoff")]
    pub exponential_backoff: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1500
}

fn default_exponential_backoff() -> bool {
    true
}

impl Default for FailoverOptions {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            exponential_backoff: default_exponential_backoff(),
        }
    }
}

impl FailoverOptions {
    /// Delay before the next attempt, 1-based.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.retry_delay_ms);
        if self.exponential_backoff {
            base * 2u32.saturating_pow(attempt.saturating_sub(1))
        } else {
            base
        }
    }
}

/// Top-level cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Subjects reporting more transactions than this are refused caching
    /// and served by passthrough. Defaults to `10_000`.
    #[serde(default = "default_max_tx_limit")]
    pub max_tx_limit: u64,

    /// Durable byte ceiling; exceeding it evicts the least-accessed
    /// subjects. Defaults to 512 MiB.
    #[serde(default = "default_max_cache_size_bytes")]
    pub max_cache_size_bytes: u64,

    /// Initial subscription lifetime in seconds. Defaults to 12 hours.
    #[serde(default = "default_ws_timeout_secs")]
    pub ws_timeout_secs: u64,

    /// Lifetime extension granted per timer reset, in seconds. Defaults
    /// to 30 minutes.
    #[serde(default = "default_ws_extend_timeout_secs")]
    pub ws_extend_timeout_secs: u64,

    /// Live-subscription cap per namespace. Defaults to `30`.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions: usize,

    /// Probability that a cached read verifies the content hash against
    /// the durable header. A tunable, not a contract. Defaults to `0.5`.
    #[serde(default = "default_hash_check_probability")]
    pub hash_check_probability: f64,

    /// Retry envelope settings.
    #[serde(default)]
    pub failover: FailoverOptions,

    /// Emit verbose per-operation log lines. Defaults to `false`.
    #[serde(default)]
    pub enable_logging: bool,

    /// Emit timing log lines around indexer calls. Defaults to `false`.
    #[serde(default)]
    pub enable_timer: bool,
}

fn default_max_tx_limit() -> u64 {
    10_000
}

fn default_max_cache_size_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_ws_timeout_secs() -> u64 {
    12 * 60 * 60
}

fn default_ws_extend_timeout_secs() -> u64 {
    30 * 60
}

fn default_max_subscriptions() -> usize {
    30
}

fn default_hash_check_probability() -> f64 {
    0.5
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_tx_limit: default_max_tx_limit(),
            max_cache_size_bytes: default_max_cache_size_bytes(),
            ws_timeout_secs: default_ws_timeout_secs(),
            ws_extend_timeout_secs: default_ws_extend_timeout_secs(),
            max_subscriptions: default_max_subscriptions(),
            hash_check_probability: default_hash_check_probability(),
            failover: FailoverOptions::default(),
            enable_logging: false,
            enable_timer: false,
        }
    }
}

impl CacheConfig {
    /// Initial subscription lifetime.
    #[must_use]
    pub fn ws_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_timeout_secs)
    }

    /// Per-reset lifetime extension.
    #[must_use]
    pub fn ws_extend_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_extend_timeout_secs)
    }
}
