//! Cross-instance sync and notification delivery
//!
//! Implement [`SyncSource`] to feed the gateway from any broker. The
//! Redis adapter subscribes to the `sync-data` channel and the
//! `notification:*` pattern; [`ChannelSyncSource`] covers tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::event::RealtimeEvent;
use crate::gateway::Services;
use crate::manager::personal_room;
use crate::router::EventContext;
use crate::store::keys;

/// Channel carrying data-sync updates for all users
pub const SYNC_CHANNEL: &str = "sync-data";

/// Subscription pattern matching every per-user notification channel
pub const NOTIFICATION_PATTERN: &str = "notification:*";

const NOTIFICATION_PREFIX: &str = "notification:";

/// Liveness keys are refreshed to this TTL on every delivered update
pub const CONNECTED_TTL: Duration = Duration::from_secs(3600);

/// Per-user notification channel name
pub fn notification_channel(user_id: &str) -> String {
    format!("{NOTIFICATION_PREFIX}{user_id}")
}

/// A message received from the broker
#[derive(Debug, Clone)]
pub struct SyncMessage {
    /// Channel the message arrived on
    pub channel: String,
    /// Raw payload (JSON string)
    pub payload: String,
}

/// Body of a `sync-data` update
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncUpdate {
    /// Target user ID
    pub id: String,
    pub data_type: String,
    pub payload: serde_json::Value,
}

/// Message handler callback type
pub type SyncHandler = Arc<dyn Fn(SyncMessage) + Send + Sync>;

/// Trait for broker subscriptions
///
/// Implementations run until the cancellation token fires and call the
/// handler for every received message.
#[async_trait]
pub trait SyncSource: Send + Sync + 'static {
    async fn start(&self, handler: SyncHandler, cancel: CancellationToken) -> anyhow::Result<()>;

    /// Source name (for logging)
    fn name(&self) -> &'static str;
}

/// A no-op source that does nothing (for single-instance deploys)
pub struct NoopSyncSource;

#[async_trait]
impl SyncSource for NoopSyncSource {
    async fn start(&self, _handler: SyncHandler, cancel: CancellationToken) -> anyhow::Result<()> {
        info!("NoopSyncSource started (no broker messages will be received)");
        cancel.cancelled().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Noop"
    }
}

/// A channel-based source for programmatic message injection
pub struct ChannelSyncSource {
    receiver: tokio::sync::Mutex<Option<tokio::sync::mpsc::Receiver<SyncMessage>>>,
}

impl ChannelSyncSource {
    pub fn new() -> (Self, tokio::sync::mpsc::Sender<SyncMessage>) {
        let (tx, rx) = tokio::sync::mpsc::channel(1000);
        (
            Self {
                receiver: tokio::sync::Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl SyncSource for ChannelSyncSource {
    async fn start(&self, handler: SyncHandler, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut receiver = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("ChannelSyncSource can only be started once"))?;

        info!("ChannelSyncSource started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = receiver.recv() => {
                    match msg {
                        Some(msg) => handler(msg),
                        None => break,
                    }
                }
            }
        }

        info!("ChannelSyncSource stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Channel"
    }
}

/// Build the handler the gateway hands to its source
///
/// Each message is dispatched on its own task so a slow delivery never
/// stalls the subscription loop.
pub fn to_handler(services: Arc<Services>) -> SyncHandler {
    Arc::new(move |msg: SyncMessage| {
        let services = services.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatch(&services, msg).await {
                warn!(error = %e, "Broker message dropped");
            }
        });
    })
}

/// Route a broker message to the right delivery path
pub async fn dispatch(services: &Services, msg: SyncMessage) -> Result<()> {
    if msg.channel == SYNC_CHANNEL {
        let update: SyncUpdate = serde_json::from_str(&msg.payload)?;
        return deliver_sync_update(services, update).await;
    }
    if let Some(user_id) = msg.channel.strip_prefix(NOTIFICATION_PREFIX) {
        let data: serde_json::Value = serde_json::from_str(&msg.payload)?;
        services
            .connections
            .send_to_user(user_id, RealtimeEvent::new("receiveNotification", data))
            .await;
        return Ok(());
    }
    debug!(channel = %msg.channel, "Ignoring message on unknown channel");
    Ok(())
}

/// Deliver a data-sync update to a user's personal room
///
/// The shared liveness key is the fleet-wide truth: if it is gone the
/// user has no live socket anywhere, so any local connections are
/// ghosts and get force-closed instead of the update.
async fn deliver_sync_update(services: &Services, update: SyncUpdate) -> Result<()> {
    let user_id = update.id.clone();
    let connected_key = keys::connected_user(&user_id);

    if services.store.exists(&connected_key).await? {
        services
            .connections
            .send_to_room(
                &personal_room(&user_id),
                RealtimeEvent::new(
                    "dataSync:update",
                    serde_json::json!({
                        "dataType": update.data_type,
                        "payload": update.payload,
                    }),
                ),
            )
            .await;
        services.store.expire(&connected_key, CONNECTED_TTL).await?;
    } else {
        let closed = services.connections.disconnect_user(&user_id);
        if closed > 0 {
            warn!(user_id, closed, "Evicted ghost connections");
        }
    }
    Ok(())
}

/// `dataSync:joinRoom`
///
/// Sync updates target the personal room, which every connection joins
/// at handshake; this re-affirms membership and acks so clients can
/// treat the subscription as explicit.
pub async fn handle_join_room(ectx: EventContext) -> Result<()> {
    let user_id = ectx.connection.user_id();
    let room = personal_room(user_id);
    ectx.services
        .connections
        .join_room(&ectx.connection.id, &room);
    ectx.connection
        .send(RealtimeEvent::new(
            "joinRoomSuccess",
            serde_json::json!({ "roomId": room }),
        ))
        .await;
    Ok(())
}
