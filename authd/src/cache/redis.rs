//! Redis cache backend over a `deadpool-redis` pool.

use super::{Cache, CacheError, Result};
use crate::config::CacheConfig;
use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, PoolConfig, PoolError, Runtime};
use redis::AsyncCommands;
use std::{collections::HashMap, time::Duration};
use tracing::{debug, instrument};

impl From<PoolError> for CacheError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Timeout(_) => CacheError::Timeout,
            PoolError::Backend(e) => CacheError::Redis(e),
            other => CacheError::Connection(other.to_string()),
        }
    }
}

/// Redis rounds expiries to whole seconds, rejects zero and takes a signed count.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().clamp(1, i64::MAX as u64)
}

#[derive(Clone)]
pub struct RedisCache {
    pool: Pool,
    connection_timeout: Duration,
}

impl RedisCache {
    pub fn new(pool: Pool, connection_timeout: Duration) -> Self {
        Self { pool, connection_timeout }
    }

    /// Build the connection pool. No connection is opened until the first command.
    pub fn from_config(config: &CacheConfig) -> anyhow::Result<Self> {
        let mut redis_config = deadpool_redis::Config::from_url(config.url.as_str());
        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(config.connection_timeout);
        pool_config.timeouts.create = Some(config.connection_timeout);
        pool_config.timeouts.recycle = Some(config.connection_timeout);
        redis_config.pool = Some(pool_config);

        let pool = redis_config.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self::new(pool, config.connection_timeout))
    }

    /// Acquire a pooled connection, failing fast once `connection_timeout` elapses.
    async fn connection(&self) -> Result<Connection> {
        match tokio::time::timeout(self.connection_timeout, self.pool.get()).await {
            Ok(conn) => Ok(conn?),
            Err(_) => Err(CacheError::Timeout),
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    #[instrument(skip(self, fields), err)]
    async fn hash_set_ex(&self, key: &str, fields: &[(String, String)], ttl: Duration) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        // MULTI/EXEC so the hash is never stored without its expiry
        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(key, fields)
            .ignore()
            .expire(key, ttl_secs(ttl) as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.connection().await?;
        let hash: HashMap<String, String> = conn.hgetall(key).await?;
        if hash.is_empty() {
            debug!(key, "cache miss");
            return Err(CacheError::NotFound);
        }
        Ok(hash)
    }

    #[instrument(skip(self, value), err)]
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)).await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get(&self, key: &str) -> Result<String> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        value.ok_or(CacheError::NotFound)
    }

    #[instrument(skip(self, members), fields(count = members.len()), err)]
    async fn set_add(&self, key: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        conn.sadd::<_, _, ()>(key, members).await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let members: Vec<String> = conn.smembers(key).await?;
        if members.is_empty() {
            return Err(CacheError::NotFound);
        }
        Ok(members)
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.expire::<_, ()>(key, ttl_secs(ttl) as i64).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
