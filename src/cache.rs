//! Persistent query cache: stale-while-revalidate reads, bounded retry with
//! exponential backoff, and durable cross-reload storage with coalesced
//! writes. Entries are addressed by a stable composite key and the whole
//! persisted namespace is versioned by a buster string, so a deployment can
//! invalidate everything atomically by changing that string.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::AuthResult;
use crate::storage::{SharedVault, KEY_QUERY_CACHE};

/// Retries after the initial attempt. Client errors (4xx) never retry.
const MAX_RETRIES: u32 = 3;
/// Backoff ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Persisted entries stale for longer than this are evicted at load time.
const EVICT_GRACE_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub stored_at: DateTime<Utc>,
    pub stale_after_ms: u64,
    pub persisted: bool,
    /// Background refetch failure for this entry only; sibling entries are
    /// never affected.
    #[serde(skip)]
    pub last_error: Option<String>,
}

impl CacheEntry {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.stored_at > chrono::Duration::milliseconds(self.stale_after_ms as i64)
    }

    fn evictable(&self, now: DateTime<Utc>) -> bool {
        now - self.stored_at
            > chrono::Duration::milliseconds(self.stale_after_ms as i64)
                + chrono::Duration::hours(EVICT_GRACE_HOURS)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedCache {
    buster: String,
    entries: Vec<CacheEntry>,
}

/// Stable composite key: resource identity plus parameters.
pub fn query_key(resource: &str, params: &[(&str, &str)]) -> String {
    let mut key = String::from(resource);
    for (name, value) in params {
        key.push_str("::");
        key.push_str(name);
        key.push('=');
        key.push_str(value);
    }
    key
}

pub fn backoff_delay(attempt: u32) -> Duration {
    let base = Duration::from_secs(1);
    let exp = base.checked_mul(1u32 << attempt.min(5)).unwrap_or(MAX_BACKOFF);
    exp.min(MAX_BACKOFF)
}

struct CacheInner {
    entries: Mutex<HashMap<String, CacheEntry>>,
    subscribers: Mutex<HashMap<String, usize>>,
    revalidating: Mutex<HashSet<String>>,
    vault: SharedVault,
    buster: String,
    flush_interval: Duration,
    last_flush: Mutex<Option<Instant>>,
    flush_pending: AtomicBool,
}

#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl QueryCache {
    /// Open the cache, restoring persisted entries if the buster matches. A
    /// buster mismatch discards everything persisted in one step.
    pub fn new(vault: SharedVault, buster: &str, flush_interval: Duration) -> Self {
        let mut entries = HashMap::new();
        if let Some(doc) = vault.get_json_lenient::<PersistedCache>(KEY_QUERY_CACHE) {
            if doc.buster == buster {
                let now = Utc::now();
                for entry in doc.entries {
                    if !entry.evictable(now) {
                        entries.insert(entry.key.clone(), entry);
                    }
                }
                debug!(target: "brandsight::cache", "restored {} persisted entries", entries.len());
            } else {
                warn!(target: "brandsight::cache",
                    "cache buster changed ('{}' -> '{}'); discarding persisted entries",
                    doc.buster, buster);
                let _ = vault.remove(KEY_QUERY_CACHE);
            }
        }
        QueryCache {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(entries),
                subscribers: Mutex::new(HashMap::new()),
                revalidating: Mutex::new(HashSet::new()),
                vault,
                buster: buster.to_string(),
                flush_interval,
                last_flush: Mutex::new(None),
                flush_pending: AtomicBool::new(false),
            }),
        }
    }

    /// Read policy: a cached value returns immediately regardless of
    /// staleness; a stale entry additionally triggers exactly one background
    /// refetch. A miss fetches inline with the retry policy applied.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        stale_after: Duration,
        fetch: F,
    ) -> AuthResult<serde_json::Value>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AuthResult<serde_json::Value>> + Send + 'static,
    {
        let cached = self.inner.entries.lock().get(key).cloned();
        if let Some(entry) = cached {
            if entry.is_stale(Utc::now()) {
                self.spawn_revalidate(key, stale_after, fetch);
            }
            return Ok(entry.value);
        }
        let value = self.fetch_with_retry(&fetch).await?;
        self.store_entry(key, value.clone(), stale_after);
        Ok(value)
    }

    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.inner.entries.lock().get(key).cloned()
    }

    pub fn subscribe(&self, key: &str) {
        *self.inner.subscribers.lock().entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn unsubscribe(&self, key: &str) {
        let mut subs = self.inner.subscribers.lock();
        if let Some(count) = subs.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                subs.remove(key);
            }
        }
    }

    fn subscriber_count(&self, key: &str) -> usize {
        self.inner.subscribers.lock().get(key).copied().unwrap_or(0)
    }

    /// Drop one entry; wired to mutation-success signals.
    pub fn invalidate(&self, key: &str) {
        if self.inner.entries.lock().remove(key).is_some() {
            debug!(target: "brandsight::cache", "invalidated '{}'", key);
            self.schedule_flush();
        }
    }

    /// Drop every entry for a resource family, e.g. after a mutation that
    /// touches all of its listings.
    pub fn invalidate_prefix(&self, prefix: &str) {
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        let dropped = before - entries.len();
        drop(entries);
        if dropped > 0 {
            debug!(target: "brandsight::cache", "invalidated {} entries under '{}'", dropped, prefix);
            self.schedule_flush();
        }
    }

    pub fn len(&self) -> usize { self.inner.entries.lock().len() }

    pub fn is_empty(&self) -> bool { self.inner.entries.lock().is_empty() }

    fn spawn_revalidate<F, Fut>(&self, key: &str, stale_after: Duration, fetch: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AuthResult<serde_json::Value>> + Send + 'static,
    {
        {
            let mut revalidating = self.inner.revalidating.lock();
            if !revalidating.insert(key.to_string()) {
                // One background refetch per key at a time.
                return;
            }
        }
        let this = self.clone();
        let key = key.to_string();
        let had_subscribers = this.subscriber_count(&key) > 0;
        debug!(target: "brandsight::cache", "stale entry '{}'; revalidating in background", key);
        tokio::spawn(async move {
            let outcome = this.fetch_with_retry(&fetch).await;
            this.inner.revalidating.lock().remove(&key);
            match outcome {
                Ok(value) => {
                    if had_subscribers && this.subscriber_count(&key) == 0 {
                        debug!(target: "brandsight::cache",
                            "discarding revalidation of '{}': no subscriber remains", key);
                        return;
                    }
                    this.store_entry(&key, value, stale_after);
                }
                Err(e) => {
                    warn!(target: "brandsight::cache", "revalidation of '{}' failed: {}", key, e);
                    if let Some(entry) = this.inner.entries.lock().get_mut(&key) {
                        entry.last_error = Some(e.to_string());
                    }
                }
            }
        });
    }

    async fn fetch_with_retry<F, Fut>(&self, fetch: &F) -> AuthResult<serde_json::Value>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = AuthResult<serde_json::Value>>,
    {
        let mut attempt = 0u32;
        loop {
            match fetch().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() && attempt < MAX_RETRIES => {
                    let delay = backoff_delay(attempt);
                    warn!(target: "brandsight::cache",
                        "fetch failed ({}); retry {}/{} in {:?}", e, attempt + 1, MAX_RETRIES, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Supersede (never mutate) the entry for a key.
    fn store_entry(&self, key: &str, value: serde_json::Value, stale_after: Duration) {
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            stored_at: Utc::now(),
            stale_after_ms: stale_after.as_millis() as u64,
            persisted: false,
            last_error: None,
        };
        self.inner.entries.lock().insert(key.to_string(), entry);
        self.schedule_flush();
    }

    /// Coalesced durable flush: at most one vault write per flush interval.
    /// A write landing inside the window arms a single delayed flush instead
    /// of writing immediately.
    fn schedule_flush(&self) {
        let now = Instant::now();
        let due = {
            let last = self.inner.last_flush.lock();
            match *last {
                Some(at) => now.duration_since(at) >= self.inner.flush_interval,
                None => true,
            }
        };
        if due {
            self.flush_now();
            return;
        }
        if self.inner.flush_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        let delay = {
            let last = self.inner.last_flush.lock();
            let elapsed = last.map(|at| now.duration_since(at)).unwrap_or_default();
            self.inner.flush_interval.saturating_sub(elapsed)
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.inner.flush_pending.store(false, Ordering::SeqCst);
            this.flush_now();
        });
    }

    fn flush_now(&self) {
        let entries: Vec<CacheEntry> = {
            let map = self.inner.entries.lock();
            map.values()
                .map(|e| {
                    let mut e = e.clone();
                    e.persisted = true;
                    e
                })
                .collect()
        };
        let doc = PersistedCache { buster: self.inner.buster.clone(), entries };
        match self.inner.vault.put_json(KEY_QUERY_CACHE, &doc) {
            Ok(()) => {
                // Only a landed write earns the durability flag.
                let mut map = self.inner.entries.lock();
                for entry in map.values_mut() {
                    entry.persisted = true;
                }
            }
            Err(e) => warn!(target: "brandsight::cache", "durable flush failed: {}", e),
        }
        *self.inner.last_flush.lock() = Some(Instant::now());
    }
}
