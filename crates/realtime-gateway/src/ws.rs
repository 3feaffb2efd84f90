//! WebSocket endpoint
//!
//! Sockets are accepted unauthenticated and must present their
//! credential in the first text frame, `{"token": "Bearer <jwt>"}`,
//! before the handshake timeout. Everything after that frame goes
//! through the event router; handler failures are reported on the
//! socket without closing it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::auth::authenticate_token;
use crate::backend::RequestContext;
use crate::chat;
use crate::connection::RealtimeConnection;
use crate::error::{Error, Result};
use crate::event::{EventEnvelope, RealtimeEvent};
use crate::gateway::{GatewayState, Services};
use crate::manager::personal_room;
use crate::store::keys;
use crate::sync::CONNECTED_TTL;

const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct HandshakeFrame {
    token: String,
}

/// GET /realtime
pub async fn realtime_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    ws.on_upgrade(move |socket| handle_socket(socket, state, query, client_ip, user_agent))
}

async fn handle_socket(
    socket: WebSocket,
    state: GatewayState,
    query: HashMap<String, String>,
    client_ip: Option<String>,
    user_agent: Option<String>,
) {
    let (mut sink, mut stream) = socket.split();
    let services = state.services.clone();

    // Handshake: first text frame carries the credential
    let user = match handshake(&services, &mut stream).await {
        Ok(user) => user,
        Err(e) => {
            debug!(error = %e, "Handshake rejected");
            let _ = sink
                .send(Message::Text(RealtimeEvent::error_event(&e).to_json().into()))
                .await;
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    let (connection, mut rx) = services
        .connections
        .register(user.clone(), client_ip, user_agent);
    let connection = Arc::new(connection);
    let user_id = connection.user_id().to_string();
    info!(user_id, connection_id = %connection.id, "Connection authenticated");

    if let Err(e) = on_connect(&services, &connection).await {
        warn!(user_id, error = %e, "Connect bookkeeping failed");
    }

    // Deterministic room targeting from handshake query parameters
    if let Err(e) = auto_join(&services, &connection, &query).await {
        connection.send(RealtimeEvent::error_event(&e)).await;
    }

    // Outbound pump; also owns the keepalive pings
    let send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await; // first tick is immediate
        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            if sink
                                .send(Message::Text(event.to_json().into()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Inbound loop
    loop {
        tokio::select! {
            _ = connection.cancel.cancelled() => {
                info!(user_id, connection_id = %connection.id, "Connection force-closed");
                break;
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, &connection, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // pings and pongs are handled by axum
                    Some(Err(e)) => {
                        debug!(error = %e, "Socket read error");
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = on_disconnect(&services, &connection).await {
        warn!(user_id, error = %e, "Disconnect bookkeeping failed");
    }
    services.connections.unregister(&connection.id);
    send_task.abort();
    info!(user_id, connection_id = %connection.id, "Connection closed");
}

/// Wait for the credential frame and verify it
async fn handshake(
    services: &Arc<Services>,
    stream: &mut futures::stream::SplitStream<WebSocket>,
) -> Result<Arc<crate::backend::UserContext>> {
    let frame = tokio::time::timeout(services.handshake_timeout, stream.next())
        .await
        .map_err(|_| Error::Unauthenticated("handshake timeout".to_string()))?;

    let text = match frame {
        Some(Ok(Message::Text(text))) => text,
        Some(Ok(_)) => {
            return Err(Error::Unauthenticated(
                "expected a text handshake frame".to_string(),
            ))
        }
        _ => return Err(Error::Unauthenticated("socket closed during handshake".to_string())),
    };

    authenticate_handshake(services, &RequestContext::new(), text.as_str()).await
}

/// Parse and verify a credential frame
async fn authenticate_handshake(
    services: &Services,
    ctx: &RequestContext,
    text: &str,
) -> Result<Arc<crate::backend::UserContext>> {
    let handshake: HandshakeFrame = serde_json::from_str(text)
        .map_err(|_| Error::Unauthenticated("malformed handshake frame".to_string()))?;

    authenticate_token(
        &services.verifier,
        &services.identity,
        services.store.as_ref(),
        ctx,
        &handshake.token,
    )
    .await
}

/// Post-handshake bookkeeping: personal room, connectSuccess, presence,
/// liveness key
async fn on_connect(services: &Arc<Services>, connection: &Arc<RealtimeConnection>) -> Result<()> {
    let user_id = connection.user_id();
    services
        .connections
        .join_room(&connection.id, &personal_room(user_id));
    connection
        .send(RealtimeEvent::connect_success(user_id, &connection.id))
        .await;
    services.presence.set_online(user_id).await?;
    services
        .store
        .set(&keys::connected_user(user_id), "1", Some(CONNECTED_TTL))
        .await
}

/// Disconnect bookkeeping: active room, presence, liveness key
async fn on_disconnect(
    services: &Arc<Services>,
    connection: &Arc<RealtimeConnection>,
) -> Result<()> {
    let user_id = connection.user_id();
    services.presence.clear_active_room(user_id).await?;
    services.presence.set_offline(user_id).await?;
    services.store.delete(&keys::connected_user(user_id)).await
}

/// Join the room named by `chatRoomId` or derived from `receiverId`
async fn auto_join(
    services: &Arc<Services>,
    connection: &Arc<RealtimeConnection>,
    query: &HashMap<String, String>,
) -> Result<()> {
    let user_id = connection.user_id().to_string();
    let room_id = if let Some(room_id) = query.get("chatRoomId") {
        chat::room_participants(room_id)?;
        room_id.clone()
    } else if let Some(receiver_id) = query.get("receiverId") {
        let ctx = RequestContext::for_session(connection.id.clone(), connection.user.clone());
        chat::room_with_receiver(services, &ctx, &user_id, receiver_id).await?
    } else {
        return Ok(());
    };

    chat::join_room(services, &connection.id, &user_id, &room_id).await?;
    connection
        .send(RealtimeEvent::new(
            "joinRoomSuccess",
            serde_json::json!({ "roomId": room_id }),
        ))
        .await;
    Ok(())
}

/// Handle one inbound text frame
async fn handle_frame(state: &GatewayState, connection: &Arc<RealtimeConnection>, text: &str) {
    let services = &state.services;
    let user_id = connection.user_id();

    // Any client activity refreshes liveness and presence
    if let Err(e) = services
        .store
        .expire(&keys::connected_user(user_id), CONNECTED_TTL)
        .await
    {
        warn!(user_id, error = %e, "Liveness refresh failed");
    }
    if let Err(e) = services.presence.set_online(user_id).await {
        warn!(user_id, error = %e, "Presence refresh failed");
    }

    let envelope: EventEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            connection
                .send(RealtimeEvent::error_event(&Error::InvalidArgument(
                    format!("malformed event: {e}"),
                )))
                .await;
            return;
        }
    };

    if envelope.tag == "ping" {
        connection.send(RealtimeEvent::pong()).await;
        return;
    }

    let ectx = crate::router::EventContext {
        services: services.clone(),
        ctx: RequestContext::for_session(connection.id.clone(), connection.user.clone()),
        connection: connection.clone(),
        payload: envelope.payload.clone(),
    };

    if let Err(e) = state.events.dispatch(envelope, ectx).await {
        connection.send(RealtimeEvent::error_event(&e)).await;
    }
}
