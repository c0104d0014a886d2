//! Subscription capacity and lifecycle: FIFO eviction at the cap, evicted
//! subjects demote to `UNKNOWN`, reconnects re-establish the set.

use crate::mock_infrastructure::{
    cache_over, confirmed_history, fast_config, poll_until, MockChronik,
};
use chronik_cache::{CacheConfig, CacheStatus, ChronikCache};

fn capped_config(max_subscriptions: usize) -> CacheConfig {
    CacheConfig { max_subscriptions, ..fast_config() }
}

async fn warm_and_subscribe(cache: &ChronikCache<MockChronik>, id: &str) {
    cache.address(id).history(0, 200).await.unwrap();
    poll_until("subject goes LATEST", || async {
        cache.cache_status(id, false) == CacheStatus::Latest
    })
    .await;
    let transport = cache.client().transport();
    let id = id.to_owned();
    poll_until("subscription established", || async {
        transport.subscribed_addresses().contains(&id)
    })
    .await;
}

#[tokio::test]
async fn test_third_subject_evicts_the_oldest() {
    let client = MockChronik::new();
    for id in ["ecash:x", "ecash:y", "ecash:z"] {
        client.set_history(id, confirmed_history(id, 5, 300));
    }
    let transport = client.transport();
    let cache = cache_over(client, capped_config(2));

    warm_and_subscribe(&cache, "ecash:x").await;
    warm_and_subscribe(&cache, "ecash:y").await;
    warm_and_subscribe(&cache, "ecash:z").await;

    // X was the oldest: unsubscribed exactly once and demoted.
    poll_until("x evicted", || async {
        cache.cache_status("ecash:x", false) == CacheStatus::Unknown
    })
    .await;
    let unsubs = transport.unsubscribed();
    assert_eq!(
        unsubs.iter().filter(|s| s.as_str() == "ecash:x").count(),
        1,
        "exactly one eviction for x"
    );

    // Y and Z survive with their warm caches.
    assert_eq!(cache.cache_status("ecash:y", false), CacheStatus::Latest);
    assert_eq!(cache.cache_status("ecash:z", false), CacheStatus::Latest);
}

#[tokio::test]
async fn test_evicted_subject_rebuilds_on_next_query() {
    let client = MockChronik::new();
    for id in ["ecash:x", "ecash:y", "ecash:z"] {
        client.set_history(id, confirmed_history(id, 5, 300));
    }
    let cache = cache_over(client, capped_config(2));

    warm_and_subscribe(&cache, "ecash:x").await;
    warm_and_subscribe(&cache, "ecash:y").await;
    warm_and_subscribe(&cache, "ecash:z").await;
    poll_until("x evicted", || async {
        cache.cache_status("ecash:x", false) == CacheStatus::Unknown
    })
    .await;

    // Querying x again walks the cold path and re-warms it (evicting
    // the now-oldest y in turn).
    cache.address("ecash:x").history(0, 5).await.unwrap();
    poll_until("x re-warms", || async {
        cache.cache_status("ecash:x", false) == CacheStatus::Latest
    })
    .await;
}

#[tokio::test]
async fn test_reconnect_restores_subscriptions() {
    let client = MockChronik::new();
    client.set_history("ecash:x", confirmed_history("x", 5, 300));
    let transport = client.transport();
    let cache = cache_over(client, capped_config(5));

    warm_and_subscribe(&cache, "ecash:x").await;

    transport.emit_reconnected();
    poll_until("re-subscribed after reconnect", || async {
        transport
            .subscribed_addresses()
            .iter()
            .filter(|s| s.as_str() == "ecash:x")
            .count() >=
            2
    })
    .await;
    assert_eq!(cache.cache_status("ecash:x", false), CacheStatus::Latest);
}

#[tokio::test]
async fn test_failed_reconnect_demotes_subject() {
    let client = MockChronik::new();
    client.set_history("ecash:x", confirmed_history("x", 5, 300));
    let transport = client.transport();
    let cache = cache_over(client, capped_config(5));

    warm_and_subscribe(&cache, "ecash:x").await;

    // The transport comes back but refuses re-subscriptions.
    transport.fail_subscribes(true);
    transport.emit_reconnected();

    poll_until("subject demoted after failed reconnect", || async {
        cache.cache_status("ecash:x", false) == CacheStatus::Unknown
    })
    .await;
}

#[tokio::test]
async fn test_clear_all_detaches_everything() {
    let client = MockChronik::new();
    for id in ["ecash:x", "ecash:y"] {
        client.set_history(id, confirmed_history(id, 5, 300));
    }
    let transport = client.transport();
    let cache = cache_over(client, capped_config(5));

    warm_and_subscribe(&cache, "ecash:x").await;
    warm_and_subscribe(&cache, "ecash:y").await;

    cache.clear_all_cache().await.unwrap();

    let unsubs = transport.unsubscribed();
    assert!(unsubs.contains(&"ecash:x".to_owned()));
    assert!(unsubs.contains(&"ecash:y".to_owned()));
    assert!(transport.is_closed(), "idle transport closes after detach_all");
    assert_eq!(cache.cache_status("ecash:x", false), CacheStatus::Unknown);
}
