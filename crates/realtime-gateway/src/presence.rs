//! Chat presence over the shared store
//!
//! Presence is what decides how a message reaches a user: an active
//! viewer of the room gets the in-room broadcast, an online non-viewer
//! gets an unread bump plus a notification publish, and an offline user
//! is left to a later push channel.

use std::time::Duration;

use crate::error::Result;
use crate::store::SharedStore;

/// A user is "viewing" a room for this long after their last join
pub const ACTIVE_ROOM_TTL: Duration = Duration::from_secs(300);

/// A user counts as online for this long after their last activity
pub const ONLINE_TTL: Duration = Duration::from_secs(600);

fn active_room_key(user_id: &str) -> String {
    format!("chat:active_room:{user_id}")
}

fn online_key(user_id: &str) -> String {
    format!("chat:online:{user_id}")
}

fn unread_key(user_id: &str, room_id: &str) -> String {
    format!("chat:unread:{user_id}:{room_id}")
}

/// Presence operations, instance-agnostic by construction
#[derive(Clone)]
pub struct PresenceStore {
    store: std::sync::Arc<dyn SharedStore>,
}

impl PresenceStore {
    pub fn new(store: std::sync::Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Mark the user as actively viewing a room
    pub async fn set_active_room(&self, user_id: &str, room_id: &str) -> Result<()> {
        self.store
            .set(&active_room_key(user_id), room_id, Some(ACTIVE_ROOM_TTL))
            .await
    }

    /// Room the user is actively viewing, if any
    pub async fn active_room(&self, user_id: &str) -> Result<Option<String>> {
        self.store.get(&active_room_key(user_id)).await
    }

    /// Clear the active-room marker (leave or disconnect)
    pub async fn clear_active_room(&self, user_id: &str) -> Result<()> {
        self.store.delete(&active_room_key(user_id)).await
    }

    /// Refresh the online marker
    pub async fn set_online(&self, user_id: &str) -> Result<()> {
        self.store
            .set(&online_key(user_id), "1", Some(ONLINE_TTL))
            .await
    }

    /// Drop the online marker immediately
    pub async fn set_offline(&self, user_id: &str) -> Result<()> {
        self.store.delete(&online_key(user_id)).await
    }

    /// Whether the user is online anywhere in the fleet
    pub async fn is_online(&self, user_id: &str) -> Result<bool> {
        self.store.exists(&online_key(user_id)).await
    }

    /// Bump the unread counter for a room, returning the new count
    pub async fn incr_unread(&self, user_id: &str, room_id: &str) -> Result<i64> {
        self.store.incr(&unread_key(user_id, room_id)).await
    }

    /// Current unread count for a room
    pub async fn unread_count(&self, user_id: &str, room_id: &str) -> Result<i64> {
        let raw = self.store.get(&unread_key(user_id, room_id)).await?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Reset the unread counter, the read acknowledgment point
    pub async fn clear_unread(&self, user_id: &str, room_id: &str) -> Result<()> {
        self.store.delete(&unread_key(user_id, room_id)).await
    }
}
