//! Cache-aside reads and post-commit cache writes.
//!
//! A [`CacheCodec`] knows how one kind of value is laid out in the cache. [`fetch_or_hydrate`]
//! reads through the codec and, on a miss only, runs the caller's loader (normally a
//! read-committed transaction) and writes the result back. A cache that fails for any reason other
//! than a miss is reported as unavailable instead of falling through to the store.

use super::{Cache, CacheError};
use crate::errors::{Error, Result};
use async_trait::async_trait;
use std::{future::Future, time::Duration};
use tracing::{debug, warn};

#[async_trait]
pub trait CacheCodec: Send + Sync {
    type Value: Send + Sync;

    /// Read and decode the value at `key`. A miss is `CacheError::NotFound`; data of the wrong
    /// shape is `CacheError::Decode`.
    async fn read(&self, cache: &dyn Cache, key: &str) -> std::result::Result<Self::Value, CacheError>;

    /// Encode and store `value` at `key` with the given expiry.
    async fn write(&self, cache: &dyn Cache, key: &str, value: &Self::Value, ttl: Duration) -> std::result::Result<(), CacheError>;
}

/// Return the cached value at `key`, or load it, hydrate the cache and return it.
///
/// `load` only runs on a miss. A failed hydration is logged and the loaded value is still
/// returned. Concurrent misses on the same key each run `load` and each write the cache; the last
/// write wins.
pub async fn fetch_or_hydrate<C, F, Fut>(cache: &dyn Cache, codec: &C, key: &str, ttl: Duration, load: F) -> Result<C::Value>
where
    C: CacheCodec,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<C::Value>>,
{
    match codec.read(cache, key).await {
        Ok(value) => {
            debug!(key, "cache hit");
            return Ok(value);
        }
        Err(CacheError::NotFound) => debug!(key, "cache miss"),
        Err(e) => return Err(Error::cache_unavailable(e)),
    }

    let value = load().await?;
    populate(cache, codec, key, &value, ttl).await;
    Ok(value)
}

/// Write a freshly committed value to the cache. Failures are logged, never returned: the store
/// already holds the authoritative copy and the entry will be loaded again on the next miss.
pub async fn populate<C: CacheCodec>(cache: &dyn Cache, codec: &C, key: &str, value: &C::Value, ttl: Duration) {
    if let Err(e) = codec.write(cache, key, value, ttl).await {
        warn!(key, error = %e, "Failed to write cache entry after commit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCache;
    use crate::test_utils::FlakyCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScalarCodec;

    #[async_trait]
    impl CacheCodec for ScalarCodec {
        type Value = String;

        async fn read(&self, cache: &dyn Cache, key: &str) -> std::result::Result<String, CacheError> {
            cache.get(key).await
        }

        async fn write(&self, cache: &dyn Cache, key: &str, value: &String, ttl: Duration) -> std::result::Result<(), CacheError> {
            cache.set(key, value, ttl).await
        }
    }

    #[tokio::test]
    async fn test_miss_loads_once_then_hits() {
        let cache = MemoryCache::new();
        let loads = AtomicUsize::new(0);
        let counter = &loads;
        let load = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("value".to_string())
        };

        let first = fetch_or_hydrate(&cache, &ScalarCodec, "k", Duration::from_secs(60), load).await.unwrap();
        let second = fetch_or_hydrate(&cache, &ScalarCodec, "k", Duration::from_secs(60), load).await.unwrap();

        assert_eq!(first, "value");
        assert_eq!(second, "value");
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_error_is_returned_and_nothing_cached() {
        let cache = MemoryCache::new();
        let result = fetch_or_hydrate(&cache, &ScalarCodec, "k", Duration::from_secs(60), || async {
            Err::<String, _>(Error::NotFound {
                resource: "User".to_string(),
                id: "7".to_string(),
            })
        })
        .await;

        assert!(matches!(result, Err(Error::NotFound { .. })));
        assert!(!cache.contains_key("k"));
    }

    #[tokio::test]
    async fn test_unavailable_cache_does_not_fall_through() {
        let cache = FlakyCache::new();
        cache.fail_reads(true);
        let loads = AtomicUsize::new(0);
        let counter = &loads;

        let result = fetch_or_hydrate(&cache, &ScalarCodec, "k", Duration::from_secs(60), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("value".to_string())
        })
        .await;

        assert!(matches!(result, Err(Error::CacheUnavailable { .. })));
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hydration_failure_still_returns_value() {
        let cache = FlakyCache::new();
        cache.fail_writes(true);

        let value = fetch_or_hydrate(&cache, &ScalarCodec, "k", Duration::from_secs(60), || async { Ok("value".to_string()) })
            .await
            .unwrap();

        assert_eq!(value, "value");
        assert!(!cache.inner().contains_key("k"));
    }
}
