//! Shared response-cache contract.
//!
//! The gateway only touches the cache through the get-or-compute-with-TTL
//! contract below; the backing store is a black box that is safe for
//! concurrent reads and writes, and a stale hit is acceptable within its
//! TTL. `MemoryCache` is the in-process implementation used by the CLI and
//! tests; deployments can plug in a shared store behind the same trait.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Key-value cache contract: JSON values with per-entry TTL.
#[async_trait]
pub trait ResponseCache: Send + Sync + fmt::Debug {
    /// Fetch a live (non-expired) entry.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Store an entry with the given time-to-live.
    async fn set(&self, key: &str, value: Value, ttl: Duration);
}

/// Read-through helper implementing the get-or-compute-with-TTL contract on
/// top of any [`ResponseCache`].
///
/// Only successful computations are cached; errors pass through uncached. A
/// cached value that no longer deserializes into `T` is treated as a miss
/// and recomputed.
pub async fn get_or_compute<T, E, F, Fut>(
    cache: &dyn ResponseCache,
    key: &str,
    ttl: Duration,
    compute: F,
) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if let Some(raw) = cache.get(key).await {
        match serde_json::from_value::<T>(raw) {
            Ok(hit) => {
                debug!(key, "cache hit");
                return Ok(hit);
            }
            Err(err) => warn!(key, %err, "discarding undeserializable cache entry"),
        }
    }

    let value = compute().await?;
    match serde_json::to_value(&value) {
        Ok(raw) => cache.set(key, raw, ttl).await,
        // An unserializable value only costs us the cache write.
        Err(err) => warn!(key, %err, "failed to serialize value for caching"),
    }
    Ok(value)
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

/// In-process TTL cache backed by a concurrent map with lazy expiry:
/// expired entries are dropped on the read that finds them.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries (expired-but-unread entries included).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = MemoryCache::new();
        cache
            .set("k", json!({"a": 1}), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("k").await, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn expired_entries_are_dropped() {
        let cache = MemoryCache::new();
        cache.set("k", json!(1), Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await, None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn get_or_compute_skips_compute_on_hit() {
        let cache = MemoryCache::new();
        let first: Result<u64, String> =
            get_or_compute(&cache, "n", Duration::from_secs(60), || async { Ok(7) }).await;
        assert_eq!(first.unwrap(), 7);

        let second: Result<u64, String> =
            get_or_compute(&cache, "n", Duration::from_secs(60), || async {
                panic!("must not recompute on a live cache entry")
            })
            .await;
        assert_eq!(second.unwrap(), 7);
    }

    #[tokio::test]
    async fn get_or_compute_does_not_cache_errors() {
        let cache = MemoryCache::new();
        let failed: Result<u64, String> =
            get_or_compute(&cache, "n", Duration::from_secs(60), || async {
                Err("boom".to_string())
            })
            .await;
        assert!(failed.is_err());
        assert!(cache.is_empty());

        let recovered: Result<u64, String> =
            get_or_compute(&cache, "n", Duration::from_secs(60), || async { Ok(9) }).await;
        assert_eq!(recovered.unwrap(), 9);
    }
}
