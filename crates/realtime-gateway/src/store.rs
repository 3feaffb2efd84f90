//! Shared keyed store abstraction
//!
//! The gateway keeps all cross-instance state (cached identities, token
//! blacklist, presence, unread counters, liveness keys) behind the
//! [`SharedStore`] trait. Production deploys back it with Redis;
//! [`MemoryStore`] covers tests and single-instance development.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;

/// Key and channel namespaces used by the gateway
pub mod keys {
    /// Cached resolved identity, keyed by slug
    pub fn user_info(slug_id: &str) -> String {
        format!("userInfo:{slug_id}")
    }

    /// Revoked access token marker
    pub fn blacklisted_token(token: &str) -> String {
        format!("blacklistedAccessToken:{token}")
    }

    /// Liveness key proving the user has a live socket somewhere
    pub fn connected_user(user_id: &str) -> String {
        format!("connectedUser:ws:{user_id}")
    }
}

/// Keyed TTL store with counters and pub/sub, shared across instances
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Get a value by key
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value, with an optional TTL
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Delete a key
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Atomically increment a counter, returning the new value
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Reset a key's TTL
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Publish a message on a channel
    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    /// Store name for logging
    fn name(&self) -> &str;
}

/// Cache-aside read: serve the cached value when present, otherwise run
/// the loader, cache its result, and return it.
///
/// Cache faults never fail the caller: an unreadable entry is treated
/// as a miss and a failed write-back is logged and dropped.
pub async fn get_or_set<T, F, Fut>(
    store: &dyn SharedStore,
    key: &str,
    ttl: Duration,
    loader: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    match store.get(key).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "Cache hit");
                return Ok(value);
            }
            Err(e) => warn!(key, error = %e, "Discarding undecodable cache entry"),
        },
        Ok(None) => {}
        Err(e) => warn!(key, error = %e, "Cache read failed, falling through to loader"),
    }

    let value = loader().await?;
    match serde_json::to_string(&value) {
        Ok(raw) => {
            if let Err(e) = store.set(key, &raw, Some(ttl)).await {
                warn!(key, error = %e, "Cache write failed");
            }
        }
        Err(e) => warn!(key, error = %e, "Cache value not serializable"),
    }
    Ok(value)
}

/// In-memory store for tests and single-instance development
///
/// Published messages are retained per channel so tests can assert on
/// cross-instance traffic without a broker.
#[derive(Default)]
pub struct MemoryStore {
    entries: dashmap::DashMap<String, (String, Option<std::time::Instant>)>,
    published: dashmap::DashMap<String, Vec<String>>,
}

impl MemoryStore {
    fn live_value(&self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                let (value, deadline) = entry.value();
                match deadline {
                    Some(d) if *d <= std::time::Instant::now() => true,
                    _ => return Some(value.clone()),
                }
            }
            None => return None,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Messages published on a channel, oldest first
    pub fn published_on(&self, channel: &str) -> Vec<String> {
        self.published
            .get(channel)
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let deadline = ttl.map(|t| std::time::Instant::now() + t);
        self.entries
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live_value(key).is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| ("0".to_string(), None));
        let current: i64 = entry.value().0.parse().unwrap_or(0);
        let next = current + 1;
        entry.value_mut().0 = next.to_string();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.value_mut().1 = Some(std::time::Instant::now() + ttl);
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        self.published
            .entry(channel.to_string())
            .or_default()
            .push(message.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
