//! Query cache behavior: stale-while-revalidate reads, the 4xx
//! never-retry rule, bounded backoff, buster-keyed durability and coalesced
//! flushing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use brandsight::cache::{query_key, QueryCache};
use brandsight::error::AuthError;
use brandsight::storage::{Vault, KEY_QUERY_CACHE};

fn counted_fetcher(
    counter: Arc<AtomicUsize>,
    value: serde_json::Value,
) -> impl Fn() -> futures::future::BoxFuture<'static, Result<serde_json::Value, AuthError>>
       + Send
       + Sync
       + 'static {
    move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let value = value.clone();
        Box::pin(async move { Ok(value) })
    }
}

#[tokio::test]
async fn fresh_hit_returns_identical_value_with_zero_fetches() {
    let tmp = tempdir().unwrap();
    let vault = Vault::open(tmp.path()).unwrap();
    let cache = QueryCache::new(vault, "v1", Duration::from_millis(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let fetch = counted_fetcher(calls.clone(), serde_json::json!({"rows": [1, 2, 3]}));

    let key = query_key("stats/summary", &[("range", "7d")]);
    let first = cache.get_or_fetch(&key, Duration::from_secs(60), fetch).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let fetch = counted_fetcher(calls.clone(), serde_json::json!({"rows": [9]}));
    let second = cache.get_or_fetch(&key, Duration::from_secs(60), fetch).await.unwrap();
    assert_eq!(first, second);
    // cached read performed no fetch at all
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_hit_returns_immediately_and_revalidates_once_in_background() {
    let tmp = tempdir().unwrap();
    let vault = Vault::open(tmp.path()).unwrap();
    let cache = QueryCache::new(vault, "v1", Duration::from_millis(0));
    let calls = Arc::new(AtomicUsize::new(0));

    let key = query_key("brands/list", &[("page", "1")]);
    cache.subscribe(&key);
    let fetch = counted_fetcher(calls.clone(), serde_json::json!("old"));
    cache.get_or_fetch(&key, Duration::from_millis(10), fetch).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(40)).await;

    let fetch = counted_fetcher(calls.clone(), serde_json::json!("new"));
    // stale read still answers from cache, instantly
    let stale_read = cache
        .get_or_fetch(&key, Duration::from_millis(10), fetch)
        .await
        .unwrap();
    assert_eq!(stale_read, serde_json::json!("old"));

    // background refetch supersedes the entry exactly once
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.peek(&key).unwrap().value, serde_json::json!("new"));
}

#[tokio::test]
async fn client_errors_are_never_retried() {
    let tmp = tempdir().unwrap();
    let vault = Vault::open(tmp.path()).unwrap();
    let cache = QueryCache::new(vault, "v1", Duration::from_millis(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let result = cache
        .get_or_fetch("missing/thing", Duration::from_secs(60), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err::<serde_json::Value, _>(AuthError::http(404, "not found")) })
                as futures::future::BoxFuture<'static, _>
        })
        .await;
    assert!(matches!(result.unwrap_err(), AuthError::Http { status: 404, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_up_to_three_times_with_backoff() {
    let tmp = tempdir().unwrap();
    let vault = Vault::open(tmp.path()).unwrap();
    let cache = QueryCache::new(vault, "v1", Duration::from_millis(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    // Two 503s, then success: 3 calls total, inside the retry budget.
    let result = cache
        .get_or_fetch("flaky/resource", Duration::from_secs(60), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < 2 {
                    Err(AuthError::http(503, "unavailable"))
                } else {
                    Ok(serde_json::json!("finally"))
                }
            }) as futures::future::BoxFuture<'static, _>
        })
        .await;
    assert_eq!(result.unwrap(), serde_json::json!("finally"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // A permanently failing fetch stops after the initial attempt + 3 retries.
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let result = cache
        .get_or_fetch("down/resource", Duration::from_secs(60), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err::<serde_json::Value, _>(AuthError::network("transport", "down")) })
                as futures::future::BoxFuture<'static, _>
        })
        .await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn persisted_entries_survive_reload_under_the_same_buster() {
    let tmp = tempdir().unwrap();
    let vault = Vault::open(tmp.path()).unwrap();
    {
        let cache = QueryCache::new(vault.clone(), "v1", Duration::from_millis(0));
        let fetch = counted_fetcher(Arc::new(AtomicUsize::new(0)), serde_json::json!(42));
        cache.get_or_fetch("durable/key", Duration::from_secs(300), fetch).await.unwrap();
    }
    let reloaded = QueryCache::new(vault, "v1", Duration::from_millis(0));
    assert_eq!(reloaded.peek("durable/key").unwrap().value, serde_json::json!(42));
    assert!(reloaded.peek("durable/key").unwrap().persisted);
}

#[tokio::test]
async fn failed_flush_does_not_claim_durability() {
    let tmp = tempdir().unwrap();
    let vault = Vault::open(tmp.path()).unwrap();
    let cache = QueryCache::new(vault, "v1", Duration::from_millis(0));
    // Pull the directory out from under the vault so the flush write fails.
    std::fs::remove_dir_all(tmp.path()).unwrap();

    let fetch = counted_fetcher(Arc::new(AtomicUsize::new(0)), serde_json::json!(1));
    cache.get_or_fetch("k", Duration::from_secs(300), fetch).await.unwrap();
    // The entry is served from memory but never marked durable.
    assert!(!cache.peek("k").unwrap().persisted);
}

#[tokio::test]
async fn buster_change_atomically_discards_persisted_entries() {
    let tmp = tempdir().unwrap();
    let vault = Vault::open(tmp.path()).unwrap();
    {
        let cache = QueryCache::new(vault.clone(), "v1", Duration::from_millis(0));
        let fetch = counted_fetcher(Arc::new(AtomicUsize::new(0)), serde_json::json!(1));
        cache.get_or_fetch("k", Duration::from_secs(300), fetch).await.unwrap();
    }
    assert!(vault.get_raw(KEY_QUERY_CACHE).is_some());

    let redeployed = QueryCache::new(vault.clone(), "v2-deploy", Duration::from_millis(0));
    assert!(redeployed.is_empty());
    assert!(vault.get_raw(KEY_QUERY_CACHE).is_none());
}

#[tokio::test(start_paused = true)]
async fn rapid_writes_coalesce_but_all_land_durably() {
    let tmp = tempdir().unwrap();
    let vault = Vault::open(tmp.path()).unwrap();
    let cache = QueryCache::new(vault.clone(), "v1", Duration::from_secs(1));

    for i in 0..5 {
        let fetch = counted_fetcher(Arc::new(AtomicUsize::new(0)), serde_json::json!(i));
        cache
            .get_or_fetch(&format!("burst/{}", i), Duration::from_secs(300), fetch)
            .await
            .unwrap();
    }
    // allow the armed delayed flush to fire
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let reloaded = QueryCache::new(vault, "v1", Duration::from_secs(1));
    assert_eq!(reloaded.len(), 5);
}

#[tokio::test]
async fn invalidation_removes_matching_entries_only() {
    let tmp = tempdir().unwrap();
    let vault = Vault::open(tmp.path()).unwrap();
    let cache = QueryCache::new(vault, "v1", Duration::from_millis(0));
    for key in ["brands/list::page=1", "brands/list::page=2", "stats/summary"] {
        let fetch = counted_fetcher(Arc::new(AtomicUsize::new(0)), serde_json::json!(key));
        cache.get_or_fetch(key, Duration::from_secs(300), fetch).await.unwrap();
    }

    cache.invalidate("stats/summary");
    assert!(cache.peek("stats/summary").is_none());

    cache.invalidate_prefix("brands/list");
    assert!(cache.is_empty());
}

#[tokio::test]
async fn unsubscribed_revalidation_results_are_discarded() {
    let tmp = tempdir().unwrap();
    let vault = Vault::open(tmp.path()).unwrap();
    let cache = QueryCache::new(vault, "v1", Duration::from_millis(0));
    let calls = Arc::new(AtomicUsize::new(0));

    let key = "watched/resource";
    cache.subscribe(key);
    let fetch = counted_fetcher(calls.clone(), serde_json::json!("old"));
    cache.get_or_fetch(key, Duration::from_millis(10), fetch).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Stale read triggers a refetch while subscribed, but the consumer leaves
    // before it completes.
    let slow_calls = calls.clone();
    let stale_read = cache
        .get_or_fetch(key, Duration::from_millis(10), move || {
            slow_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(serde_json::json!("new"))
            }) as futures::future::BoxFuture<'static, _>
        })
        .await
        .unwrap();
    assert_eq!(stale_read, serde_json::json!("old"));
    cache.unsubscribe(key);

    tokio::time::sleep(Duration::from_millis(100)).await;
    // refetch ran to completion but its result was dropped
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.peek(key).unwrap().value, serde_json::json!("old"));
}
