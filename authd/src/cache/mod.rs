//! Key-value cache in front of the primary store.
//!
//! The [`Cache`] trait mirrors the handful of Redis commands the services use. A missing key is
//! reported as [`CacheError::NotFound`] so callers can tell a miss apart from a transport failure:
//! misses fall through to the store, failures surface as `Error::CacheUnavailable`.
//!
//! Backends: [`redis::RedisCache`] over a `deadpool-redis` pool and [`memory::MemoryCache`] over a
//! `DashMap`. [`aside`] holds the generic read-through/hydrate logic shared by users, roles and
//! endpoint access.

pub mod aside;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::{collections::HashMap, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    /// Key absent or expired
    #[error("Cache key not found")]
    NotFound,

    /// No connection could be acquired within the configured timeout
    #[error("Timed out acquiring a cache connection")]
    Timeout,

    #[error("Cache connection failed: {0}")]
    Connection(String),

    /// The key holds data of an unexpected shape
    #[error("Unexpected value at {key}: {message}")]
    Decode { key: String, message: String },

    #[error(transparent)]
    Redis(#[from] ::redis::RedisError),
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[async_trait]
pub trait Cache: Send + Sync {
    /// Set fields on a hash and its expiry in one step, so the hash never outlives `ttl`.
    /// Existing fields not named are kept.
    async fn hash_set_ex(&self, key: &str, fields: &[(String, String)], ttl: Duration) -> Result<()>;

    /// All fields of a hash. An empty or missing hash is `NotFound`.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Set a scalar value with an expiry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<String>;

    async fn set_add(&self, key: &str, members: &[String]) -> Result<()>;

    /// Members of a set. An empty or missing set is `NotFound`.
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Set the expiry of an existing key. A missing key is left alone.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}
