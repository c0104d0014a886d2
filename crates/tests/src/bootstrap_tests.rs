//! First-query bootstrap: a cold subject is served by passthrough while
//! the background build fills the durable store, after which the same
//! query is a cache hit.

use crate::mock_infrastructure::{
    cache_over, confirmed_history, confirmed_tx_mislabeled, fast_config, poll_until, MockChronik,
};
use chronik_cache::{
    CacheStatus, ChronikCache, MemoryStore, ResponseStatus, SledStore,
};
use serde_json::json;
use std::{collections::HashSet, sync::Arc};

const ADDR: &str = "ecash:alpha";

async fn warm(cache: &ChronikCache<MockChronik>, id: &str) {
    cache.address(id).history(0, 200).await.unwrap();
    poll_until("subject goes LATEST", || async {
        cache.cache_status(id, false) == CacheStatus::Latest
    })
    .await;
}

#[tokio::test]
async fn test_first_query_bootstrap() {
    let client = MockChronik::new();
    client.set_history(ADDR, confirmed_history("a", 350, 5000));
    let cache = cache_over(client, fast_config());

    // Cold: indexer passthrough, tagged.
    let first = cache.address(ADDR).history(0, 200).await.unwrap();
    assert_eq!(first.status, Some(ResponseStatus::Passthrough));
    assert_eq!(first.num_txs, 350);
    assert_eq!(first.num_pages, 2);
    assert_eq!(first.txs.len(), 200);

    poll_until("build completes", || async {
        cache.cache_status(ADDR, false) == CacheStatus::Latest
    })
    .await;

    // Warm: served from cache, no status tag, same shape.
    let second = cache.address(ADDR).history(0, 200).await.unwrap();
    assert_eq!(second.status, None);
    assert_eq!(second.num_txs, 350);
    assert_eq!(second.num_pages, 2);
    assert_eq!(second.txs.len(), 200);
    assert_eq!(second.txs[0].txid, "a00000", "newest transaction leads the page");
}

#[tokio::test]
async fn test_page_concatenation_covers_the_full_set() {
    let client = MockChronik::new();
    client.set_history(ADDR, confirmed_history("a", 45, 900));
    let cache = cache_over(client, fast_config());
    warm(&cache, ADDR).await;

    let mut seen = HashSet::new();
    let mut first_of_page_zero = None;
    for page in 0..3 {
        let result = cache.address(ADDR).history(page, 20).await.unwrap();
        assert_eq!(result.num_txs, 45);
        if page == 0 {
            first_of_page_zero = result.txs.first().map(|tx| tx.txid.clone());
        }
        for tx in result.txs {
            assert!(seen.insert(tx.txid), "pages must not overlap");
        }
    }
    assert_eq!(seen.len(), 45);
    assert_eq!(first_of_page_zero.as_deref(), Some("a00000"));
}

#[tokio::test]
async fn test_warm_subject_stops_hitting_the_indexer() {
    let client = MockChronik::new();
    client.set_history(ADDR, confirmed_history("a", 20, 700));
    let cache = cache_over(client, fast_config());
    warm(&cache, ADDR).await;

    let baseline = cache.client().history_calls();
    for _ in 0..5 {
        let page = cache.address(ADDR).history(0, 10).await.unwrap();
        assert_eq!(page.status, None);
    }
    assert_eq!(
        cache.client().history_calls(),
        baseline,
        "warm reads must not touch the indexer"
    );
}

#[tokio::test]
async fn test_script_resolves_to_address_subject() {
    let client = MockChronik::new();
    client.set_history("ecash:p2pkh:00aabb", confirmed_history("s", 5, 400));
    let cache = cache_over(client, fast_config());

    // Uppercase hash normalizes before resolution.
    let handle = cache.script("p2pkh", "00AABB").unwrap();
    assert_eq!(handle.id(), "ecash:p2pkh:00aabb");

    let page = handle.history(0, 5).await.unwrap();
    assert_eq!(page.num_txs, 5);
}

#[tokio::test]
async fn test_pass_through_tags_object_responses() {
    let client = MockChronik::new();
    client.set_passthrough("blockchainInfo", json!({"tipHeight": 900_000}));
    let cache = cache_over(client, fast_config());

    let response = cache.pass_through("blockchainInfo", json!({})).await.unwrap();
    assert_eq!(response["tipHeight"], json!(900_000));
    assert_eq!(response["status"], json!(3));
}

#[tokio::test]
async fn test_bootstrap_over_durable_store() {
    let dir = tempfile::tempdir().unwrap();
    let kv = Arc::new(SledStore::open(dir.path().join("cache")).unwrap());

    let client = MockChronik::new();
    client.set_history(ADDR, confirmed_history("a", 30, 800));
    let cache = ChronikCache::new(client, kv, fast_config());

    cache.address(ADDR).history(0, 10).await.unwrap();
    poll_until("durable build completes", || async {
        cache.cache_status(ADDR, false) == CacheStatus::Latest
    })
    .await;

    let page = cache.address(ADDR).history(1, 10).await.unwrap();
    assert_eq!(page.status, None);
    assert_eq!(page.num_txs, 30);
    assert_eq!(page.txs[0].txid, "a00010");

    cache.destroy().await;
}

#[tokio::test]
async fn test_mislabeled_final_hint_is_normalized_during_build() {
    // The indexer reports a placed transaction whose finality hint lags
    // its block placement. The build must not carry the stale hint into
    // the cached view.
    let client = MockChronik::new();
    let mut history = confirmed_history("a", 6, 400);
    history.insert(0, confirmed_tx_mislabeled("hinted", 401, 2000));
    client.set_history(ADDR, history);
    let cache = cache_over(client, fast_config());

    cache.address(ADDR).history(0, 200).await.unwrap();
    poll_until("build completes", || async {
        cache.cache_status(ADDR, false) == CacheStatus::Latest
    })
    .await;

    let page = cache.address(ADDR).history(0, 200).await.unwrap();
    assert_eq!(page.status, None);
    let hinted = page.txs.iter().find(|tx| tx.txid == "hinted").unwrap();
    assert!(hinted.block.as_ref().is_some_and(|b| b.height == 401));
    assert!(hinted.is_final, "placed transactions read as final from the cache");
    // Every placed transaction in the served page carries the invariant,
    // not just the mislabeled one.
    assert!(page.txs.iter().filter(|tx| tx.block.is_some()).all(|tx| tx.is_final));
}

#[tokio::test]
async fn test_token_namespace_is_symmetric() {
    let client = MockChronik::new();
    client.set_history("deadbeef", confirmed_history("t", 12, 300));
    let cache = cache_over(client, fast_config());

    let first = cache.token_id("deadbeef").history(0, 10).await.unwrap();
    assert_eq!(first.status, Some(ResponseStatus::Passthrough));

    poll_until("token build completes", || async {
        cache.cache_status("deadbeef", true) == CacheStatus::Latest
    })
    .await;

    let second = cache.token_id("deadbeef").history(0, 10).await.unwrap();
    assert_eq!(second.status, None);
    assert_eq!(second.num_txs, 12);
    assert_eq!(second.num_pages, 2);
}

#[tokio::test]
async fn test_memory_store_variant_matches() {
    // Same flow as the durable variant, over the ephemeral store.
    let client = MockChronik::new();
    client.set_history(ADDR, confirmed_history("a", 8, 100));
    let cache =
        ChronikCache::new(client, Arc::new(MemoryStore::new()), fast_config());

    cache.address(ADDR).history(0, 8).await.unwrap();
    poll_until("build completes", || async {
        cache.cache_status(ADDR, false) == CacheStatus::Latest
    })
    .await;

    let page = cache.address(ADDR).history(0, 8).await.unwrap();
    assert_eq!(page.txs.len(), 8);
}
