// src/storage/redis.rs

use crate::error::Result;
use crate::storage::KeyValueStore;
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use tracing::{info, instrument, trace};

/// Redis implementation of the key-value store
pub struct RedisStore {
    pool: Pool,
    key_prefix: String,
}

impl RedisStore {
    pub fn new(pool: Pool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.into(),
        }
    }

    /// Build a connection pool for `redis_url` and verify it with a `PING`.
    #[instrument(skip(redis_url), name = "redis_store_connect")]
    pub async fn connect(redis_url: &str, key_prefix: &str) -> Result<Self> {
        let pool = Config::from_url(redis_url).create_pool(Some(Runtime::Tokio1))?;
        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(redis.key_prefix = key_prefix, "Connected to Redis store");
        Ok(Self::new(pool, key_prefix))
    }

    fn prefix_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = conn.get(self.prefix_key(key)).await?;
        trace!(found = value.is_some(), "RedisStore::get");
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.set(self.prefix_key(key), value).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let removed: usize = conn.del(self.prefix_key(key)).await?;
        Ok(removed > 0)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
