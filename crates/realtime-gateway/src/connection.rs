//! Authenticated realtime connection types

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::UserContext;
use crate::event::RealtimeEvent;

/// Metadata about a connection
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// When the handshake completed
    pub connected_at: chrono::DateTime<chrono::Utc>,
    /// Gateway instance ID
    pub instance_id: String,
    /// Client IP address (if available)
    pub client_ip: Option<String>,
    /// User agent (if available)
    pub user_agent: Option<String>,
}

/// An authenticated WebSocket connection
///
/// Created once the handshake frame has been verified; unauthenticated
/// sockets never get one of these.
#[derive(Debug)]
pub struct RealtimeConnection {
    /// Unique connection ID
    pub id: String,
    /// Authenticated identity
    pub user: Arc<UserContext>,
    /// Sender for pushing events to this connection
    pub sender: mpsc::Sender<RealtimeEvent>,
    /// Cancelled to force-close the socket (ghost-connection eviction)
    pub cancel: CancellationToken,
    /// Connection metadata
    pub metadata: ConnectionMetadata,
}

impl RealtimeConnection {
    /// Create a new connection record and its outbound receiver
    pub fn new(
        user: Arc<UserContext>,
        instance_id: String,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> (Self, mpsc::Receiver<RealtimeEvent>) {
        let (sender, receiver) = mpsc::channel(100);
        let connection = Self {
            id: uuid::Uuid::new_v4().to_string(),
            user,
            sender,
            cancel: CancellationToken::new(),
            metadata: ConnectionMetadata {
                connected_at: chrono::Utc::now(),
                instance_id,
                client_ip,
                user_agent,
            },
        };
        (connection, receiver)
    }

    /// Check if the connection is still active
    pub fn is_active(&self) -> bool {
        !self.sender.is_closed() && !self.cancel.is_cancelled()
    }

    /// Send an event to this connection
    pub async fn send(&self, event: RealtimeEvent) -> bool {
        self.sender.send(event).await.is_ok()
    }

    /// Ask the socket task to close this connection
    pub fn force_close(&self) {
        self.cancel.cancel();
    }

    /// ID of the user behind this connection
    pub fn user_id(&self) -> &str {
        &self.user.user_id
    }
}

impl Clone for RealtimeConnection {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            user: self.user.clone(),
            sender: self.sender.clone(),
            cancel: self.cancel.clone(),
            metadata: self.metadata.clone(),
        }
    }
}
