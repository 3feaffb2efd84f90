//! Chat service handlers
//!
//! Rooms are derived from their participants, so any two users always
//! land in the same room regardless of who initiates. Delivery is
//! presence-driven: in-room broadcast for active viewers, unread bump
//! plus cross-instance notification for everyone else.

use serde::Deserialize;
use tracing::{info, warn};

use crate::backend::{ChatMessage, RequestContext, SendMessageRequest};
use crate::error::{Error, Result};
use crate::event::RealtimeEvent;
use crate::router::EventContext;
use crate::sync::notification_channel;

const ROOM_PREFIX: &str = "chatRoom:";
const ID_SEPARATOR: &str = "::";

/// Canonical room ID for a set of participants
///
/// Participant IDs are sorted before joining, so the result is
/// independent of argument order.
pub fn chat_room_id(participants: &[String]) -> String {
    let mut ids: Vec<&str> = participants.iter().map(|s| s.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    format!("{ROOM_PREFIX}{}", ids.join(ID_SEPARATOR))
}

/// Recover the participant IDs encoded in a room ID
pub fn room_participants(room_id: &str) -> Result<Vec<String>> {
    let encoded = room_id
        .strip_prefix(ROOM_PREFIX)
        .ok_or_else(|| Error::InvalidArgument(format!("not a chat room id: {room_id:?}")))?;
    let ids: Vec<String> = encoded
        .split(ID_SEPARATOR)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    if ids.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "empty chat room id: {room_id:?}"
        )));
    }
    Ok(ids)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinRoomPayload {
    #[serde(default)]
    room_id: Option<String>,
    #[serde(default)]
    receiver_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessagePayload {
    room_id: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaveRoomPayload {
    room_id: String,
}

/// Resolve the target room from a join payload
async fn resolve_room(
    services: &crate::gateway::Services,
    ctx: &RequestContext,
    user_id: &str,
    payload: &JoinRoomPayload,
) -> Result<String> {
    if let Some(room_id) = &payload.room_id {
        room_participants(room_id)?;
        return Ok(room_id.clone());
    }
    if let Some(receiver_id) = &payload.receiver_id {
        return room_with_receiver(services, ctx, user_id, receiver_id).await;
    }
    Err(Error::InvalidArgument(
        "joinRoom requires roomId or receiverId".to_string(),
    ))
}

/// Direct-chat room with a receiver named by their slug
///
/// The receiver goes through the identity cache first, so opening a
/// chat with an unknown user fails before any room state is touched.
pub async fn room_with_receiver(
    services: &crate::gateway::Services,
    ctx: &RequestContext,
    user_id: &str,
    receiver_slug: &str,
) -> Result<String> {
    let receivers = services
        .identity
        .resolve_many(ctx, &[receiver_slug.to_string()])
        .await?;
    let receiver = receivers
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound(format!("unknown user {receiver_slug:?}")))?;
    if receiver.user_id == user_id {
        return Err(Error::InvalidArgument(
            "cannot open a chat with yourself".to_string(),
        ));
    }
    Ok(chat_room_id(&[
        user_id.to_string(),
        receiver.user_id.clone(),
    ]))
}

/// `chat:joinRoom`
///
/// Joining a room is the read acknowledgment point: the active-room
/// marker is set and the room's unread counter is cleared.
pub async fn handle_join_room(ectx: EventContext) -> Result<()> {
    let payload: JoinRoomPayload = serde_json::from_value(ectx.payload)?;
    let user_id = ectx.connection.user_id().to_string();
    let room_id = resolve_room(&ectx.services, &ectx.ctx, &user_id, &payload).await?;

    join_room(&ectx.services, &ectx.connection.id, &user_id, &room_id).await?;

    ectx.connection
        .send(RealtimeEvent::new(
            "joinRoomSuccess",
            serde_json::json!({ "roomId": room_id }),
        ))
        .await;
    Ok(())
}

/// Shared join flow, also used by the handshake auto-join
pub async fn join_room(
    services: &crate::gateway::Services,
    connection_id: &str,
    user_id: &str,
    room_id: &str,
) -> Result<()> {
    services.connections.join_room(connection_id, room_id);
    services.presence.set_active_room(user_id, room_id).await?;
    services.presence.clear_unread(user_id, room_id).await?;
    info!(user_id, room_id, "Joined chat room");
    Ok(())
}

/// `chat:sendMessage`
pub async fn handle_send_message(ectx: EventContext) -> Result<()> {
    let payload: SendMessagePayload = serde_json::from_value(ectx.payload)?;
    if payload.content.trim().is_empty() {
        return Err(Error::InvalidArgument("empty message".to_string()));
    }
    let participants = room_participants(&payload.room_id)?;
    let sender = ectx.connection.user.clone();
    if !participants.iter().any(|p| p == &sender.user_id) {
        return Err(Error::Forbidden("not a participant of this room".to_string()));
    }

    let message = ectx
        .services
        .chat
        .send_message(
            &ectx.ctx,
            SendMessageRequest {
                room_id: payload.room_id.clone(),
                user_id: sender.user_id.clone(),
                user_slug_id: sender.slug_id.clone(),
                participants: participants.clone(),
                content: payload.content,
            },
        )
        .await?;

    post_message_fanout(&ectx.services, &ectx.connection.id, &participants, &message).await
}

/// Deliver a persisted message
///
/// Order matters: the in-room broadcast happens before any presence
/// bookkeeping so active viewers see the message with no added latency.
/// The sender's own connection is excluded from the broadcast and from
/// the per-participant pass.
pub async fn post_message_fanout(
    services: &crate::gateway::Services,
    sender_connection_id: &str,
    participants: &[String],
    message: &ChatMessage,
) -> Result<()> {
    let event = RealtimeEvent::new("receiveMessage", serde_json::to_value(message)?);
    services
        .connections
        .send_to_room_except(&message.room_id, Some(sender_connection_id), event)
        .await;

    for participant in participants {
        if participant == &message.user_id {
            continue;
        }
        if let Err(e) = notify_participant(services, participant, message).await {
            // One participant's bookkeeping never blocks the others
            warn!(user_id = %participant, error = %e, "Notification bookkeeping failed");
        }
    }
    Ok(())
}

async fn notify_participant(
    services: &crate::gateway::Services,
    user_id: &str,
    message: &ChatMessage,
) -> Result<()> {
    let active = services.presence.active_room(user_id).await?;
    if active.as_deref() == Some(message.room_id.as_str()) {
        // Already viewing the room; the broadcast covered them
        return Ok(());
    }

    let unread = services
        .presence
        .incr_unread(user_id, &message.room_id)
        .await?;

    if services.presence.is_online(user_id).await? {
        let notification = serde_json::json!({
            "type": "chat_message",
            "roomId": message.room_id,
            "senderId": message.user_id,
            "senderName": message.sender_name,
            "content": message.content,
            "timestamp": message.created_at,
            "unreadCount": unread,
        });
        services
            .store
            .publish(&notification_channel(user_id), &notification.to_string())
            .await?;
    } else {
        info!(user_id, room_id = %message.room_id, "User offline, deferring to push");
    }
    Ok(())
}

/// `chat:leaveRoom`
pub async fn handle_leave_room(ectx: EventContext) -> Result<()> {
    let payload: LeaveRoomPayload = serde_json::from_value(ectx.payload)?;
    let user_id = ectx.connection.user_id();

    ectx.services
        .connections
        .leave_room(&ectx.connection.id, &payload.room_id);
    ectx.services.presence.clear_active_room(user_id).await?;
    info!(user_id, room_id = %payload.room_id, "Left chat room");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_is_order_independent() {
        let a = chat_room_id(&["u2".into(), "u1".into()]);
        let b = chat_room_id(&["u1".into(), "u2".into()]);
        assert_eq!(a, b);
        assert_eq!(a, "chatRoom:u1::u2");
    }

    #[test]
    fn participants_roundtrip() {
        let room = chat_room_id(&["u9".into(), "u3".into(), "u5".into()]);
        assert_eq!(room_participants(&room).unwrap(), vec!["u3", "u5", "u9"]);
    }

    #[test]
    fn rejects_foreign_room_ids() {
        assert!(room_participants("user:u1").is_err());
        assert!(room_participants("chatRoom:").is_err());
    }
}
