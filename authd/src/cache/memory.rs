//! In-process cache backend.

use super::{Cache, CacheError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::{Duration, Instant},
};

#[derive(Clone, Debug)]
enum Value {
    Scalar(String),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "string",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
        }
    }
}

#[derive(Clone, Debug)]
struct CachedEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CachedEntry {
    fn new(value: Value) -> Self {
        Self { value, expires_at: None }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// `None` when `ttl` is too far out to represent, which leaves the entry without an expiry.
fn deadline(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

fn wrong_type(key: &str, found: &Value, wanted: &str) -> CacheError {
    CacheError::Decode {
        key: key.to_string(),
        message: format!("expected {wanted}, found {}", found.kind()),
    }
}

/// `DashMap`-backed cache with per-key expiry, for single-process deployments and tests.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, CachedEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.live(key).is_some()
    }

    /// Time left before `key` expires. `None` for a missing key or one without an expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entry = self.entries.get(key)?;
        entry.expires_at.and_then(|at| at.checked_duration_since(Instant::now()))
    }

    fn live(&self, key: &str) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired());
        }
        None
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn hash_set_ex(&self, key: &str, fields: &[(String, String)], ttl: Duration) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CachedEntry::new(Value::Hash(HashMap::new())));
        if entry.is_expired() {
            *entry = CachedEntry::new(Value::Hash(HashMap::new()));
        }
        match &mut entry.value {
            Value::Hash(hash) => hash.extend(fields.iter().cloned()),
            other => return Err(wrong_type(key, other, "hash")),
        }
        entry.expires_at = deadline(ttl);
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        match self.live(key) {
            Some(Value::Hash(hash)) if !hash.is_empty() => Ok(hash),
            Some(Value::Hash(_)) | None => Err(CacheError::NotFound),
            Some(other) => Err(wrong_type(key, &other, "hash")),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CachedEntry {
                value: Value::Scalar(value.to_string()),
                expires_at: deadline(ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String> {
        match self.live(key) {
            Some(Value::Scalar(value)) => Ok(value),
            None => Err(CacheError::NotFound),
            Some(other) => Err(wrong_type(key, &other, "string")),
        }
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CachedEntry::new(Value::Set(BTreeSet::new())));
        if entry.is_expired() {
            *entry = CachedEntry::new(Value::Set(BTreeSet::new()));
        }
        match &mut entry.value {
            Value::Set(set) => {
                set.extend(members.iter().cloned());
                Ok(())
            }
            other => Err(wrong_type(key, other, "set")),
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        match self.live(key) {
            Some(Value::Set(set)) if !set.is_empty() => Ok(set.into_iter().collect()),
            Some(Value::Set(_)) | None => Err(CacheError::NotFound),
            Some(other) => Err(wrong_type(key, &other, "set")),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        if let Some(mut entry) = self.entries.get_mut(key)
            && !entry.is_expired()
        {
            entry.expires_at = deadline(ttl);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_keys_are_not_found() {
        let cache = MemoryCache::new();
        assert!(matches!(cache.get("role:alice").await, Err(CacheError::NotFound)));
        assert!(matches!(cache.hash_get_all("user:1").await, Err(CacheError::NotFound)));
        assert!(matches!(cache.set_members("access:admin").await, Err(CacheError::NotFound)));
    }

    #[tokio::test]
    async fn test_expiry() {
        let cache = MemoryCache::new();
        cache.set("role:alice", "true", Duration::from_millis(20)).await.unwrap();
        assert_eq!(cache.get("role:alice").await.unwrap(), "true");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(cache.get("role:alice").await, Err(CacheError::NotFound)));
        assert!(!cache.contains_key("role:alice"));
    }

    #[tokio::test]
    async fn test_hash_merge_and_expire() {
        let cache = MemoryCache::new();
        cache
            .hash_set_ex("user:1", &[("name".to_string(), "alice".to_string())], Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .hash_set_ex("user:1", &[("email".to_string(), "a@example.com".to_string())], Duration::from_millis(20))
            .await
            .unwrap();
        assert!(cache.ttl("user:1").is_some_and(|ttl| ttl <= Duration::from_millis(20)));

        let hash = cache.hash_get_all("user:1").await.unwrap();
        assert_eq!(hash.len(), 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(cache.hash_get_all("user:1").await, Err(CacheError::NotFound)));
    }

    #[tokio::test]
    async fn test_wrong_type_is_decode_error() {
        let cache = MemoryCache::new();
        cache.set("user:1", "oops", Duration::from_secs(60)).await.unwrap();
        assert!(matches!(cache.hash_get_all("user:1").await, Err(CacheError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_sets() {
        let cache = MemoryCache::new();
        cache
            .set_add("access:user", &["/a".to_string(), "/b".to_string()])
            .await
            .unwrap();
        cache.set_add("access:user", &["/a".to_string()]).await.unwrap();
        assert_eq!(cache.set_members("access:user").await.unwrap(), vec!["/a", "/b"]);

        cache.delete("access:user").await.unwrap();
        assert!(matches!(cache.set_members("access:user").await, Err(CacheError::NotFound)));
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_overflow() {
        let cache = MemoryCache::new();
        cache.set("role:alice", "true", Duration::MAX).await.unwrap();
        cache
            .hash_set_ex("user:1", &[("name".to_string(), "alice".to_string())], Duration::MAX)
            .await
            .unwrap();
        cache.expire("role:alice", Duration::MAX).await.unwrap();

        assert_eq!(cache.get("role:alice").await.unwrap(), "true");
        assert!(cache.hash_get_all("user:1").await.is_ok());
    }
}
