//! HTTP API routes, with their guard layers
//!
//! Layer order matters: the last-added layer runs first, so guards are
//! added inner-to-outer as authorization, authentication, then any
//! route extensions the guards read.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;

use realtime_gateway::auth::{authentication, AuthMode};
use realtime_gateway::backend::{
    ChatHistoryRequest, ChatMessage, RequestContext, RotateTokenRequest, RotateTokenResponse,
};
use realtime_gateway::rbac::{authorization, RequiredPermission};
use realtime_gateway::{room_participants, Error, GatewayState};

/// Assemble all API routes against the gateway state
pub fn api_routes(state: GatewayState) -> Router<GatewayState> {
    let rotation = Router::new()
        .route("/auth/rotate-token", post(rotate_token))
        .layer(from_fn_with_state(state.clone(), authentication))
        .layer(Extension(AuthMode::Rotation));

    let chat = Router::new()
        .route("/chat/history", get(chat_history))
        .route("/chat/unread/{room_id}", get(unread_count))
        .layer(from_fn_with_state(state.clone(), authentication));

    let admin = Router::new()
        .merge(guarded(
            &state,
            RequiredPermission::new("rbac", "create"),
            Router::new()
                .route("/rbac/roles", post(create_role))
                .route("/rbac/resources", post(create_resource)),
        ))
        .merge(guarded(
            &state,
            RequiredPermission::new("rbac", "grant"),
            Router::new().route("/rbac/grants", post(grant_access)),
        ));

    rotation.merge(chat).merge(admin)
}

/// Wrap a router in the authentication + authorization guard pair
fn guarded(
    state: &GatewayState,
    permission: RequiredPermission,
    router: Router<GatewayState>,
) -> Router<GatewayState> {
    router
        .layer(from_fn_with_state(state.clone(), authorization))
        .layer(from_fn_with_state(state.clone(), authentication))
        .layer(Extension(permission))
}

async fn rotate_token(
    State(state): State<GatewayState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<RotateTokenRequest>,
) -> Result<Json<RotateTokenResponse>, Error> {
    let pair = state.services.auth.rotate_token(&ctx, req).await?;
    Ok(Json(pair))
}

async fn chat_history(
    State(state): State<GatewayState>,
    Extension(ctx): Extension<RequestContext>,
    Query(req): Query<ChatHistoryRequest>,
) -> Result<Json<Vec<ChatMessage>>, Error> {
    require_participant(&ctx, &req.room_id)?;
    let messages = state.services.chat.chat_history(&ctx, req).await?;
    Ok(Json(messages))
}

async fn unread_count(
    State(state): State<GatewayState>,
    Extension(ctx): Extension<RequestContext>,
    Path(room_id): Path<String>,
) -> Result<Json<serde_json::Value>, Error> {
    require_participant(&ctx, &room_id)?;
    let user_id = ctx
        .user_id()
        .ok_or_else(|| Error::Unauthenticated("identity required".to_string()))?;
    let count = state
        .services
        .presence
        .unread_count(user_id, &room_id)
        .await?;
    Ok(Json(serde_json::json!({
        "roomId": room_id,
        "count": count,
    })))
}

/// History and unread counters are only visible to room members
fn require_participant(ctx: &RequestContext, room_id: &str) -> Result<(), Error> {
    let user_id = ctx
        .user_id()
        .ok_or_else(|| Error::Unauthenticated("identity required".to_string()))?;
    let participants = room_participants(room_id)?;
    if !participants.iter().any(|p| p == user_id) {
        return Err(Error::Forbidden("not a participant of this room".to_string()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct NamePayload {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GrantPayload {
    role: String,
    resource: String,
    action: String,
}

async fn create_role(
    State(state): State<GatewayState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<NamePayload>,
) -> Result<StatusCode, Error> {
    state.services.policy.create_role(&ctx, &req.name).await?;
    Ok(StatusCode::CREATED)
}

async fn create_resource(
    State(state): State<GatewayState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<NamePayload>,
) -> Result<StatusCode, Error> {
    state
        .services
        .policy
        .create_resource(&ctx, &req.name)
        .await?;
    Ok(StatusCode::CREATED)
}

async fn grant_access(
    State(state): State<GatewayState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<GrantPayload>,
) -> Result<StatusCode, Error> {
    state
        .services
        .policy
        .grant_access(&ctx, &req.role, &req.resource, &req.action)
        .await?;
    Ok(StatusCode::CREATED)
}
