//! Content-hash drift: a durable header that disagrees with the loaded
//! view schedules a forced rebuild while the request in flight still
//! serves.

use crate::mock_infrastructure::{confirmed_history, fast_config, poll_until, MockChronik};
use chronik_cache::{
    cache::{engine::CacheEngine, hash::hash_tx_order},
    CacheConfig, CacheStatus, MemoryStore, Namespace,
};
use std::sync::Arc;

const ADDR: &str = "ecash:drifty";

fn always_check_config() -> CacheConfig {
    CacheConfig { hash_check_probability: 1.0, ..fast_config() }
}

async fn warm_engine(
    config: CacheConfig,
) -> Arc<CacheEngine<MockChronik>> {
    let client = MockChronik::new();
    client.set_history(ADDR, confirmed_history("d", 25, 600));
    let engine = CacheEngine::new(Arc::new(client), Arc::new(MemoryStore::new()), config);

    engine.history(Namespace::Address, ADDR, 0, 10).await.unwrap();
    poll_until("build completes", || async {
        engine.cache_status(Namespace::Address, ADDR) == CacheStatus::Latest
    })
    .await;
    engine
}

#[tokio::test]
async fn test_drift_detection_schedules_rebuild() {
    let engine = warm_engine(always_check_config()).await;
    let store = Arc::clone(engine.store());

    // Corrupt the durable header so every checked read sees drift.
    let mut meta = store.read_metadata(Namespace::Address, ADDR).unwrap().unwrap();
    let good_hash = meta.data_hash.clone();
    meta.data_hash = "0".repeat(64);
    store.write_metadata(Namespace::Address, ADDR, &meta).unwrap();

    // The detecting request still serves the loaded view.
    let page = engine.history(Namespace::Address, ADDR, 0, 10).await.unwrap();
    assert_eq!(page.num_txs, 25);
    assert_eq!(page.txs.len(), 10);

    // The forced rebuild lands a fresh, consistent header.
    poll_until("header hash repaired", || async {
        store
            .read_metadata(Namespace::Address, ADDR)
            .ok()
            .flatten()
            .is_some_and(|m| m.data_hash == good_hash)
    })
    .await;

    let data = store.read_subject(Namespace::Address, ADDR).unwrap().unwrap();
    assert_eq!(hash_tx_order(&data.tx_order), good_hash);
}

#[tokio::test]
async fn test_consistent_header_never_triggers_rebuild() {
    let engine = warm_engine(always_check_config()).await;
    let store = Arc::clone(engine.store());
    let before = store.read_metadata(Namespace::Address, ADDR).unwrap().unwrap();

    for _ in 0..5 {
        let page = engine.history(Namespace::Address, ADDR, 0, 10).await.unwrap();
        assert_eq!(page.status, None);
    }

    let after = store.read_metadata(Namespace::Address, ADDR).unwrap().unwrap();
    assert_eq!(after.data_hash, before.data_hash);
    assert_eq!(after.updated_at, before.updated_at, "no rewrite without drift");
}

#[tokio::test]
async fn test_disabled_check_ignores_corrupt_header() {
    // Probability zero: the drift is never sampled, reads keep serving.
    let engine =
        warm_engine(CacheConfig { hash_check_probability: 0.0, ..fast_config() }).await;
    let store = Arc::clone(engine.store());

    let mut meta = store.read_metadata(Namespace::Address, ADDR).unwrap().unwrap();
    meta.data_hash = "f".repeat(64);
    store.write_metadata(Namespace::Address, ADDR, &meta).unwrap();

    for _ in 0..5 {
        let page = engine.history(Namespace::Address, ADDR, 0, 10).await.unwrap();
        assert_eq!(page.num_txs, 25);
    }
    let after = store.read_metadata(Namespace::Address, ADDR).unwrap().unwrap();
    assert_eq!(after.data_hash, "f".repeat(64), "no check, no repair");
}
