//! Redis Pub/Sub sync source

use async_trait::async_trait;
use realtime_gateway::sync::{NOTIFICATION_PATTERN, SYNC_CHANNEL};
use realtime_gateway::{SyncHandler, SyncMessage, SyncSource};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Redis Pub/Sub sync source
///
/// Subscribes to the exact channels and the patterns it is given and
/// forwards every message to the gateway's dispatch handler.
///
/// # Example
///
/// ```rust,ignore
/// use realtime_gateway::Gateway;
/// use realtime_gateway_redis::RedisSyncSource;
///
/// Gateway::builder()
///     .sync_source(RedisSyncSource::with_defaults("redis://localhost:6379"))
///     // ...
///     .build()?
///     .run()
///     .await
/// ```
pub struct RedisSyncSource {
    redis_url: String,
    channels: Vec<String>,
    patterns: Vec<String>,
}

impl RedisSyncSource {
    /// Create a new Redis Pub/Sub source
    pub fn new(redis_url: impl Into<String>, channels: Vec<String>, patterns: Vec<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            channels,
            patterns,
        }
    }

    /// Subscribe to the gateway's standard channels: the data-sync
    /// channel and the per-user notification pattern
    pub fn with_defaults(redis_url: impl Into<String>) -> Self {
        Self::new(
            redis_url,
            vec![SYNC_CHANNEL.to_string()],
            vec![NOTIFICATION_PATTERN.to_string()],
        )
    }
}

#[async_trait]
impl SyncSource for RedisSyncSource {
    async fn start(&self, handler: SyncHandler, cancel: CancellationToken) -> anyhow::Result<()> {
        info!(
            url = %self.redis_url,
            channels = ?self.channels,
            patterns = ?self.patterns,
            "Starting Redis Pub/Sub"
        );

        let client = redis::Client::open(self.redis_url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;

        for channel in &self.channels {
            pubsub.subscribe(channel).await?;
            info!(channel = %channel, "Subscribed");
        }
        for pattern in &self.patterns {
            pubsub.psubscribe(pattern).await?;
            info!(pattern = %pattern, "Subscribed");
        }

        let mut stream = pubsub.into_on_message();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = stream.next() => {
                    match msg {
                        Some(msg) => {
                            let channel = msg.get_channel_name().to_string();
                            match msg.get_payload::<String>() {
                                Ok(payload) => handler(SyncMessage { channel, payload }),
                                Err(e) => warn!(channel = %channel, error = %e, "Undecodable payload"),
                            }
                        }
                        None => {
                            warn!("Redis stream ended");
                            break;
                        }
                    }
                }
            }
        }

        info!("Redis Pub/Sub stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Redis Pub/Sub"
    }
}
