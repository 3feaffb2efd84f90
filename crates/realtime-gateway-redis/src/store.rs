//! Redis-backed shared store

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use realtime_gateway::{Error, Result, SharedStore};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::info;

/// Shared store over a Redis connection manager
///
/// The connection manager reconnects on its own; individual command
/// failures surface as `Unavailable` and are left to the caller's
/// error policy (the identity cache treats them as misses, presence
/// bookkeeping logs and moves on).
///
/// # Example
///
/// ```rust,ignore
/// use realtime_gateway_redis::RedisStore;
///
/// let store = RedisStore::new();
/// store.connect("redis://localhost:6379").await?;
/// ```
#[derive(Clone)]
pub struct RedisStore {
    redis: Arc<RwLock<Option<ConnectionManager>>>,
}

impl RedisStore {
    pub fn new() -> Self {
        Self {
            redis: Arc::new(RwLock::new(None)),
        }
    }

    /// Connect to Redis
    pub async fn connect(&self, redis_url: &str) -> anyhow::Result<()> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        *self.redis.write().await = Some(manager);
        info!("Redis store connected");
        Ok(())
    }

    /// Whether a connection has been established
    pub async fn is_connected(&self) -> bool {
        self.redis.read().await.is_some()
    }

    async fn conn(&self) -> Result<ConnectionManager> {
        self.redis
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Unavailable("redis not connected".to_string()))
    }
}

impl Default for RedisStore {
    fn default() -> Self {
        Self::new()
    }
}

fn map_err(e: redis::RedisError) -> Error {
    Error::Unavailable(format!("redis: {e}"))
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        conn.get(key).await.map_err(map_err)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn().await?;
        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs())
                .await
                .map_err(map_err),
            None => conn.set::<_, _, ()>(key, value).await.map_err(map_err),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key).await.map_err(map_err)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        conn.exists(key).await.map_err(map_err)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        conn.incr(key, 1).await.map_err(map_err)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.expire::<_, ()>(key, ttl.as_secs() as i64)
            .await
            .map_err(map_err)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.publish::<_, _, ()>(channel, message)
            .await
            .map_err(map_err)
    }

    fn name(&self) -> &str {
        "redis"
    }
}
