//! Connection Manager for handling realtime connections

use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::backend::UserContext;
use crate::connection::RealtimeConnection;
use crate::event::RealtimeEvent;

/// Room every user is placed into on connect; personal notifications
/// and sync updates target it
pub fn personal_room(user_id: &str) -> String {
    format!("user:{user_id}")
}

/// Manages all realtime connections and their room memberships
#[derive(Clone)]
pub struct ConnectionManager {
    /// All active connections: connection_id -> connection
    connections: Arc<DashMap<String, RealtimeConnection>>,
    /// Index: room -> set of connection_ids
    room_index: Arc<DashMap<String, DashSet<String>>>,
    /// Index: connection_id -> rooms joined
    joined_rooms: Arc<DashMap<String, DashSet<String>>>,
    /// Index: user_id -> connection_ids on this instance
    user_index: Arc<DashMap<String, DashSet<String>>>,
    /// Gateway instance ID
    instance_id: String,
}

impl ConnectionManager {
    /// Create a new connection manager
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            room_index: Arc::new(DashMap::new()),
            joined_rooms: Arc::new(DashMap::new()),
            user_index: Arc::new(DashMap::new()),
            instance_id: instance_id.into(),
        }
    }

    /// Register a new authenticated connection
    pub fn register(
        &self,
        user: Arc<UserContext>,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> (RealtimeConnection, mpsc::Receiver<RealtimeEvent>) {
        let (connection, receiver) = RealtimeConnection::new(
            user,
            self.instance_id.clone(),
            client_ip,
            user_agent,
        );

        let connection_id = connection.id.clone();
        self.user_index
            .entry(connection.user_id().to_string())
            .or_default()
            .insert(connection_id.clone());
        self.connections.insert(connection_id, connection.clone());

        (connection, receiver)
    }

    /// Unregister a connection and drop all of its room memberships
    pub fn unregister(&self, connection_id: &str) {
        if let Some((_, connection)) = self.connections.remove(connection_id) {
            if let Some((_, rooms)) = self.joined_rooms.remove(connection_id) {
                for room in rooms.iter() {
                    if let Some(ids) = self.room_index.get(room.key()) {
                        ids.remove(connection_id);
                    }
                }
            }
            let user_id = connection.user_id();
            let mut drop_user = false;
            if let Some(ids) = self.user_index.get(user_id) {
                ids.remove(connection_id);
                drop_user = ids.is_empty();
            }
            if drop_user {
                self.user_index.remove(user_id);
            }
            info!(connection_id, user_id, "Connection unregistered");
        }
    }

    /// Add a connection to a room
    pub fn join_room(&self, connection_id: &str, room: &str) {
        if !self.connections.contains_key(connection_id) {
            return;
        }
        self.room_index
            .entry(room.to_string())
            .or_default()
            .insert(connection_id.to_string());
        self.joined_rooms
            .entry(connection_id.to_string())
            .or_default()
            .insert(room.to_string());
    }

    /// Remove a connection from a room
    pub fn leave_room(&self, connection_id: &str, room: &str) {
        if let Some(ids) = self.room_index.get(room) {
            ids.remove(connection_id);
        }
        if let Some(rooms) = self.joined_rooms.get(connection_id) {
            rooms.remove(room);
        }
    }

    /// Whether a connection has joined a room
    pub fn is_in_room(&self, connection_id: &str, room: &str) -> bool {
        self.room_index
            .get(room)
            .map(|ids| ids.contains(connection_id))
            .unwrap_or(false)
    }

    /// Send an event to every connection in a room
    pub async fn send_to_room(&self, room: &str, event: RealtimeEvent) -> usize {
        self.send_to_room_except(room, None, event).await
    }

    /// Send an event to a room, excluding one connection (the sender)
    pub async fn send_to_room_except(
        &self,
        room: &str,
        except: Option<&str>,
        event: RealtimeEvent,
    ) -> usize {
        let connection_ids: Vec<String> = self
            .room_index
            .get(room)
            .map(|ids| ids.iter().map(|id| id.clone()).collect())
            .unwrap_or_default();

        let mut sent = 0;
        for conn_id in connection_ids {
            if Some(conn_id.as_str()) == except {
                continue;
            }
            // Clone out of the map so no shard lock is held across the send
            let conn = self.connections.get(&conn_id).map(|c| c.clone());
            if let Some(conn) = conn {
                if conn.send(event.clone()).await {
                    sent += 1;
                }
            }
        }
        sent
    }

    /// Send an event to every local connection of a user
    pub async fn send_to_user(&self, user_id: &str, event: RealtimeEvent) -> usize {
        let connection_ids: Vec<String> = self
            .user_index
            .get(user_id)
            .map(|ids| ids.iter().map(|id| id.clone()).collect())
            .unwrap_or_default();

        let mut sent = 0;
        for conn_id in connection_ids {
            let conn = self.connections.get(&conn_id).map(|c| c.clone());
            if let Some(conn) = conn {
                if conn.send(event.clone()).await {
                    sent += 1;
                }
            }
        }
        sent
    }

    /// Force-close every local connection of a user
    pub fn disconnect_user(&self, user_id: &str) -> usize {
        let connection_ids: Vec<String> = self
            .user_index
            .get(user_id)
            .map(|ids| ids.iter().map(|id| id.clone()).collect())
            .unwrap_or_default();

        let mut closed = 0;
        for conn_id in &connection_ids {
            if let Some(conn) = self.connections.get(conn_id) {
                conn.force_close();
                closed += 1;
            }
        }
        closed
    }

    /// Whether the user has at least one live connection on this instance
    pub fn is_user_connected_local(&self, user_id: &str) -> bool {
        self.user_index
            .get(user_id)
            .map(|ids| {
                ids.iter().any(|id| {
                    self.connections
                        .get(id.key())
                        .map(|c| c.is_active())
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }

    /// Get total connection count
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get connections for a specific room
    pub fn room_connection_count(&self, room: &str) -> usize {
        self.room_index.get(room).map(|ids| ids.len()).unwrap_or(0)
    }

    /// Clean up dead connections
    pub fn cleanup_dead_connections(&self) {
        let dead_ids: Vec<String> = self
            .connections
            .iter()
            .filter(|e| !e.value().is_active())
            .map(|e| e.key().clone())
            .collect();

        for id in dead_ids {
            self.unregister(&id);
        }
    }

    /// Get the instance ID
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}
