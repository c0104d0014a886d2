//! Shared helpers for eventual-consistency assertions and fixture data.
//!
//! Timing-sensitive tests poll until a condition holds instead of
//! sleeping fixed amounts: they pass as soon as the condition is met and
//! carry an explicit timeout for slow CI machines.

use super::mock_client::MockChronik;
use chronik_cache::{
    BlockMeta, CacheConfig, ChronikCache, FailoverOptions, MemoryStore, Tx,
};
use serde_json::Map;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::{sleep, Instant};

/// Timing envelope for polled assertions.
pub struct TestTiming {
    pub poll_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for TestTiming {
    fn default() -> Self {
        Self { poll_timeout: Duration::from_secs(5), poll_interval: Duration::from_millis(20) }
    }
}

/// Polls until `check` returns true or the timeout elapses.
///
/// Panics with `condition_name` on timeout so failures read well.
pub async fn poll_until<F, Fut>(condition_name: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let timing = TestTiming::default();
    let start = Instant::now();
    while start.elapsed() < timing.poll_timeout {
        if check().await {
            return;
        }
        sleep(timing.poll_interval).await;
    }
    panic!("{condition_name} did not become true within {:?}", timing.poll_timeout);
}

/// A confirmed transaction at the given height.
pub fn confirmed_tx(txid: &str, height: i64, time_first_seen: i64) -> Tx {
    Tx {
        txid: txid.to_owned(),
        block: Some(BlockMeta { height, timestamp: height * 600 }),
        time_first_seen,
        is_final: true,
        extra: Map::new(),
    }
}

/// A confirmed transaction whose finality hint lags its placement, as
/// indexers sometimes report it.
pub fn confirmed_tx_mislabeled(txid: &str, height: i64, time_first_seen: i64) -> Tx {
    Tx { is_final: false, ..confirmed_tx(txid, height, time_first_seen) }
}

/// A mempool transaction without block placement.
pub fn mempool_tx(txid: &str, time_first_seen: i64) -> Tx {
    Tx {
        txid: txid.to_owned(),
        block: None,
        time_first_seen,
        is_final: false,
        extra: Map::new(),
    }
}

/// A descending confirmed history of `n` transactions, newest first.
pub fn confirmed_history(prefix: &str, n: usize, top_height: i64) -> Vec<Tx> {
    (0..n)
        .map(|i| confirmed_tx(&format!("{prefix}{i:05}"), top_height - i as i64, 1000 - i as i64))
        .collect()
}

/// Configuration with millisecond retries and the hash check disabled,
/// so tests are fast and deterministic unless they opt back in.
pub fn fast_config() -> CacheConfig {
    CacheConfig {
        failover: FailoverOptions {
            max_retries: 2,
            retry_delay_ms: 1,
            exponential_backoff: false,
        },
        hash_check_probability: 0.0,
        ..CacheConfig::default()
    }
}

/// Wraps a mock client with the cache over an in-memory store. Grab the
/// transport handle off the client before calling this if the test needs
/// to inject events; afterwards reach the client via `cache.client()`.
pub fn cache_over(client: MockChronik, config: CacheConfig) -> ChronikCache<MockChronik> {
    ChronikCache::new(client, Arc::new(MemoryStore::new()), config)
}
