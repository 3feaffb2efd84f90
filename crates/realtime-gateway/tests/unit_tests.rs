//! Integration tests for realtime-gateway

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request as HttpRequest, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::routing::post;
use axum::{Extension, Router};
use tower::ServiceExt;

use realtime_gateway::async_trait;
use realtime_gateway::SharedStore;
use realtime_gateway::auth::{authentication, AuthMode};
use realtime_gateway::backend::{
    AuthBackend, ChatBackend, ChatHistoryRequest, ChatMessage, PolicyBackend, RequestContext,
    RotateTokenRequest, RotateTokenResponse, SendMessageRequest, UserContext,
};
use realtime_gateway::rbac::{authorization, RequiredPermission};
use realtime_gateway::store::keys;
use realtime_gateway::sync::{self, SyncMessage, SYNC_CHANNEL};
use realtime_gateway::{
    chat_room_id, personal_room, ConnectionManager, Error, EventContext, EventEnvelope,
    EventRouter, GatewayState, IdentityResolver, MemoryStore, PresenceStore, RealtimeConnection,
    RealtimeEvent, Result, Services, TokenVerifier,
};

// ============== Fakes ==============

fn user(id: &str) -> UserContext {
    UserContext {
        user_id: id.to_string(),
        slug_id: format!("slug-{id}"),
        username: format!("name-{id}"),
        role: "member".to_string(),
        email: None,
        character_summary: None,
    }
}

#[derive(Default)]
struct FakeAuthBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl AuthBackend for FakeAuthBackend {
    async fn get_user_from_slug(&self, _ctx: &RequestContext, slug_id: &str) -> Result<UserContext> {
        if slug_id == "ghost" {
            return Err(Error::NotFound(format!("no user for slug {slug_id:?}")));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id = slug_id
            .strip_prefix("slug-")
            .unwrap_or(slug_id)
            .to_string();
        Ok(user(&id))
    }

    async fn get_users_from_slugs(
        &self,
        ctx: &RequestContext,
        slug_ids: &[String],
    ) -> Result<Vec<UserContext>> {
        let mut users = Vec::new();
        for slug in slug_ids {
            users.push(self.get_user_from_slug(ctx, slug).await?);
        }
        Ok(users)
    }

    async fn rotate_token(
        &self,
        _ctx: &RequestContext,
        _req: RotateTokenRequest,
    ) -> Result<RotateTokenResponse> {
        Ok(RotateTokenResponse {
            access_token: "new-access".to_string(),
            refresh_token: "new-refresh".to_string(),
        })
    }
}

struct FakePolicyBackend;

#[async_trait]
impl PolicyBackend for FakePolicyBackend {
    async fn check_permission(
        &self,
        _ctx: &RequestContext,
        user_id: &str,
        _resource: &str,
        _action: &str,
    ) -> Result<bool> {
        Ok(user_id == "admin")
    }

    async fn create_role(&self, _ctx: &RequestContext, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn create_resource(&self, _ctx: &RequestContext, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn grant_access(
        &self,
        _ctx: &RequestContext,
        _role: &str,
        _resource: &str,
        _action: &str,
    ) -> Result<()> {
        Ok(())
    }
}

/// Records the key each permission check was made with
#[derive(Default)]
struct RecordingPolicyBackend {
    checked: Mutex<Vec<String>>,
}

#[async_trait]
impl PolicyBackend for RecordingPolicyBackend {
    async fn check_permission(
        &self,
        _ctx: &RequestContext,
        user_id: &str,
        _resource: &str,
        _action: &str,
    ) -> Result<bool> {
        self.checked.lock().unwrap().push(user_id.to_string());
        Ok(true)
    }

    async fn create_role(&self, _ctx: &RequestContext, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn create_resource(&self, _ctx: &RequestContext, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn grant_access(
        &self,
        _ctx: &RequestContext,
        _role: &str,
        _resource: &str,
        _action: &str,
    ) -> Result<()> {
        Ok(())
    }
}

struct FakeChatBackend;

#[async_trait]
impl ChatBackend for FakeChatBackend {
    async fn send_message(
        &self,
        _ctx: &RequestContext,
        req: SendMessageRequest,
    ) -> Result<ChatMessage> {
        Ok(ChatMessage {
            message_id: uuid::Uuid::new_v4().to_string(),
            room_id: req.room_id,
            user_id: req.user_id.clone(),
            sender_name: format!("name-{}", req.user_id),
            content: req.content,
            created_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    async fn chat_history(
        &self,
        _ctx: &RequestContext,
        _req: ChatHistoryRequest,
    ) -> Result<Vec<ChatMessage>> {
        Ok(Vec::new())
    }
}

fn build_services_with_policy(
    store: Arc<MemoryStore>,
    policy: Arc<dyn PolicyBackend>,
) -> (Arc<Services>, Arc<FakeAuthBackend>) {
    let auth = Arc::new(FakeAuthBackend::default());
    let store_dyn: Arc<dyn realtime_gateway::SharedStore> = store;
    let services = Arc::new(Services {
        verifier: TokenVerifier::new("s3cret"),
        identity: IdentityResolver::new(store_dyn.clone(), auth.clone()),
        connections: ConnectionManager::new("test-instance"),
        presence: PresenceStore::new(store_dyn.clone()),
        store: store_dyn,
        auth: auth.clone(),
        policy,
        chat: Arc::new(FakeChatBackend),
        instance_id: "test-instance".to_string(),
        handshake_timeout: Duration::from_secs(1),
    });
    (services, auth)
}

fn build_services(store: Arc<MemoryStore>) -> (Arc<Services>, Arc<FakeAuthBackend>) {
    build_services_with_policy(store, Arc::new(FakePolicyBackend))
}

fn gateway_state(services: Arc<Services>) -> GatewayState {
    GatewayState {
        services,
        events: Arc::new(EventRouter::with_defaults()),
    }
}

fn connect(
    services: &Arc<Services>,
    user_id: &str,
) -> (
    Arc<RealtimeConnection>,
    tokio::sync::mpsc::Receiver<RealtimeEvent>,
) {
    let (connection, rx) = services
        .connections
        .register(Arc::new(user(user_id)), None, None);
    let connection = Arc::new(connection);
    services
        .connections
        .join_room(&connection.id, &personal_room(user_id));
    (connection, rx)
}

async fn dispatch(
    services: &Arc<Services>,
    router: &EventRouter,
    connection: &Arc<RealtimeConnection>,
    tag: &str,
    payload: serde_json::Value,
) -> Result<()> {
    let envelope = EventEnvelope {
        tag: tag.to_string(),
        payload: payload.clone(),
    };
    let ectx = EventContext {
        services: services.clone(),
        ctx: RequestContext::for_session(connection.id.clone(), connection.user.clone()),
        connection: connection.clone(),
        payload,
    };
    router.dispatch(envelope, ectx).await
}

fn drain(rx: &mut tokio::sync::mpsc::Receiver<RealtimeEvent>) -> Vec<RealtimeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn make_token(secret: &str, slug: &str, exp_offset: i64) -> String {
    #[derive(serde::Serialize)]
    struct Claims<'a> {
        #[serde(rename = "slugId")]
        slug_id: &'a str,
        exp: i64,
    }
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &Claims {
            slug_id: slug,
            exp: chrono::Utc::now().timestamp() + exp_offset,
        },
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

// ============== Identity cache ==============

#[tokio::test]
async fn identity_resolution_hits_backend_once() {
    let store = Arc::new(MemoryStore::default());
    let (services, auth) = build_services(store);

    let ctx = RequestContext::new();
    let first = services.identity.resolve(&ctx, "slug-u1").await.unwrap();
    let second = services.identity.resolve(&ctx, "slug-u1").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalidation_forces_a_reload() {
    let store = Arc::new(MemoryStore::default());
    let (services, auth) = build_services(store);

    let ctx = RequestContext::new();
    services.identity.resolve(&ctx, "slug-u1").await.unwrap();
    services.identity.invalidate("slug-u1").await.unwrap();
    services.identity.resolve(&ctx, "slug-u1").await.unwrap();

    assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
}

// ============== Token verification ==============

#[tokio::test]
async fn full_pipeline_accepts_a_valid_bearer_token() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store);

    let token = make_token("s3cret", "slug-u1", 600);
    let ctx = RequestContext::new();
    let user = realtime_gateway::auth::authenticate_token(
        &services.verifier,
        &services.identity,
        services.store.as_ref(),
        &ctx,
        &format!("Bearer {token}"),
    )
    .await
    .unwrap();
    assert_eq!(user.user_id, "u1");
}

#[tokio::test]
async fn blacklisted_token_is_rejected_before_verification() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store.clone());

    // Blacklist entries reject even tokens that would not verify
    let token = "not-even-a-jwt";
    store
        .set(&keys::blacklisted_token(token), "1", None)
        .await
        .unwrap();

    let ctx = RequestContext::new();
    let result = realtime_gateway::auth::authenticate_token(
        &services.verifier,
        &services.identity,
        services.store.as_ref(),
        &ctx,
        &format!("Bearer {token}"),
    )
    .await;
    assert!(matches!(result, Err(Error::Forbidden(_))));
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store);

    let token = make_token("s3cret", "slug-u1", -600);
    let ctx = RequestContext::new();
    let result = realtime_gateway::auth::authenticate_token(
        &services.verifier,
        &services.identity,
        services.store.as_ref(),
        &ctx,
        &format!("Bearer {token}"),
    )
    .await;
    assert!(matches!(result, Err(Error::Forbidden(_))));
}

#[tokio::test]
async fn missing_bearer_prefix_is_unauthenticated() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store);

    let token = make_token("s3cret", "slug-u1", 600);
    let ctx = RequestContext::new();
    let result = realtime_gateway::auth::authenticate_token(
        &services.verifier,
        &services.identity,
        services.store.as_ref(),
        &ctx,
        &token,
    )
    .await;
    assert!(matches!(result, Err(Error::Unauthenticated(_))));
}

// ============== HTTP guards ==============

#[tokio::test]
async fn authorization_is_keyed_by_user_id() {
    let store = Arc::new(MemoryStore::default());
    let policy = Arc::new(RecordingPolicyBackend::default());
    let (services, _) = build_services_with_policy(store, policy.clone());
    let state = gateway_state(services);

    let app = Router::new()
        .route("/admin", post(|| async { StatusCode::OK }))
        .layer(from_fn_with_state(state.clone(), authorization))
        .layer(from_fn_with_state(state.clone(), authentication))
        .layer(Extension(RequiredPermission::new("rbac", "create")))
        .with_state(state);

    let token = make_token("s3cret", "slug-u1", 600);
    let response = app
        .oneshot(
            HttpRequest::post("/admin")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(*policy.checked.lock().unwrap(), vec!["u1".to_string()]);
}

#[tokio::test]
async fn rotation_guard_resolves_and_attaches_the_caller() {
    let store = Arc::new(MemoryStore::default());
    let (services, auth) = build_services(store);
    let state = gateway_state(services);

    async fn handler(Extension(ctx): Extension<RequestContext>) -> StatusCode {
        if ctx.user_id() == Some("u1") {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    let app = Router::new()
        .route("/rotate", post(handler))
        .layer(from_fn_with_state(state.clone(), authentication))
        .layer(Extension(AuthMode::Rotation))
        .with_state(state);

    let response = app
        .oneshot(
            HttpRequest::post("/rotate")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"userId":"slug-u1","refreshToken":"r"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rotation_rejects_unknown_users_before_reaching_the_handler() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store);
    let state = gateway_state(services);

    let app = Router::new()
        .route("/rotate", post(|| async { StatusCode::OK }))
        .layer(from_fn_with_state(state.clone(), authentication))
        .layer(Extension(AuthMode::Rotation))
        .with_state(state);

    let response = app
        .oneshot(
            HttpRequest::post("/rotate")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"userId":"ghost","refreshToken":"r"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============== Rooms ==============

#[test]
fn room_id_is_independent_of_initiator() {
    assert_eq!(
        chat_room_id(&["u7".into(), "u2".into()]),
        chat_room_id(&["u2".into(), "u7".into()])
    );
}

#[tokio::test]
async fn join_room_sets_presence_and_clears_unread() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store);
    let router = EventRouter::with_defaults();
    let (conn, mut rx) = connect(&services, "u1");

    // Pre-existing unread messages from u2
    let room = chat_room_id(&["u1".into(), "u2".into()]);
    services.presence.incr_unread("u1", &room).await.unwrap();
    services.presence.incr_unread("u1", &room).await.unwrap();

    dispatch(
        &services,
        &router,
        &conn,
        "chat:joinRoom",
        serde_json::json!({ "receiverId": "u2" }),
    )
    .await
    .unwrap();

    assert_eq!(
        services.presence.active_room("u1").await.unwrap(),
        Some(room.clone())
    );
    assert_eq!(services.presence.unread_count("u1", &room).await.unwrap(), 0);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "joinRoomSuccess");
    assert_eq!(events[0].data["roomId"], serde_json::json!(room));
}

#[tokio::test]
async fn join_by_receiver_resolves_through_the_cache() {
    let store = Arc::new(MemoryStore::default());
    let (services, auth) = build_services(store);
    let router = EventRouter::with_defaults();
    let (conn, mut rx) = connect(&services, "u1");

    dispatch(
        &services,
        &router,
        &conn,
        "chat:joinRoom",
        serde_json::json!({ "receiverId": "slug-u2" }),
    )
    .await
    .unwrap();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].data["roomId"],
        serde_json::json!(chat_room_id(&["u1".into(), "u2".into()]))
    );
    assert_eq!(auth.calls.load(Ordering::SeqCst), 1);

    // A second join hits the identity cache, not the backend
    dispatch(
        &services,
        &router,
        &conn,
        "chat:joinRoom",
        serde_json::json!({ "receiverId": "slug-u2" }),
    )
    .await
    .unwrap();
    assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn joining_with_an_unknown_receiver_fails() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store);
    let router = EventRouter::with_defaults();
    let (conn, mut rx) = connect(&services, "u1");

    let result = dispatch(
        &services,
        &router,
        &conn,
        "chat:joinRoom",
        serde_json::json!({ "receiverId": "ghost" }),
    )
    .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn joining_a_room_with_yourself_is_rejected() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store);
    let router = EventRouter::with_defaults();
    let (conn, _rx) = connect(&services, "u1");

    let result = dispatch(
        &services,
        &router,
        &conn,
        "chat:joinRoom",
        serde_json::json!({ "receiverId": "u1" }),
    )
    .await;
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

// ============== Fanout ==============

#[tokio::test]
async fn fanout_splits_viewers_and_absentees() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store.clone());
    let router = EventRouter::with_defaults();

    let room = chat_room_id(&["u1".into(), "u2".into(), "u3".into()]);

    // u1 sends; u2 is actively viewing the room; u3 is online elsewhere
    let (sender, mut sender_rx) = connect(&services, "u1");
    let (viewer, mut viewer_rx) = connect(&services, "u2");
    let (_absent, mut absent_rx) = connect(&services, "u3");

    for conn in [&sender, &viewer] {
        services.connections.join_room(&conn.id, &room);
    }
    services.presence.set_active_room("u2", &room).await.unwrap();
    services.presence.set_online("u3").await.unwrap();

    dispatch(
        &services,
        &router,
        &sender,
        "chat:sendMessage",
        serde_json::json!({ "roomId": room, "content": "hello" }),
    )
    .await
    .unwrap();

    // Viewer got the broadcast, sender was excluded
    let viewer_events = drain(&mut viewer_rx);
    assert_eq!(viewer_events.len(), 1);
    assert_eq!(viewer_events[0].event, "receiveMessage");
    assert_eq!(viewer_events[0].data["content"], serde_json::json!("hello"));
    assert!(drain(&mut sender_rx).is_empty());

    // The absentee got no in-room delivery, only bookkeeping
    assert!(drain(&mut absent_rx).is_empty());
    assert_eq!(services.presence.unread_count("u3", &room).await.unwrap(), 1);
    assert_eq!(services.presence.unread_count("u2", &room).await.unwrap(), 0);

    // Online absentee: a notification was published on their channel
    let published = store.published_on(&sync::notification_channel("u3"));
    assert_eq!(published.len(), 1);
    let notification: serde_json::Value = serde_json::from_str(&published[0]).unwrap();
    assert_eq!(notification["type"], serde_json::json!("chat_message"));
    assert_eq!(notification["senderId"], serde_json::json!("u1"));
    assert_eq!(notification["unreadCount"], serde_json::json!(1));
}

#[tokio::test]
async fn offline_participants_get_no_notification_publish() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store.clone());
    let router = EventRouter::with_defaults();

    let room = chat_room_id(&["u1".into(), "u2".into()]);
    let (sender, _rx) = connect(&services, "u1");
    services.connections.join_room(&sender.id, &room);

    dispatch(
        &services,
        &router,
        &sender,
        "chat:sendMessage",
        serde_json::json!({ "roomId": room, "content": "hi" }),
    )
    .await
    .unwrap();

    // Unread still counts up, but nothing is published for offline users
    assert_eq!(services.presence.unread_count("u2", &room).await.unwrap(), 1);
    assert!(store
        .published_on(&sync::notification_channel("u2"))
        .is_empty());
}

#[tokio::test]
async fn non_participants_may_not_send() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store);
    let router = EventRouter::with_defaults();

    let room = chat_room_id(&["u2".into(), "u3".into()]);
    let (outsider, _rx) = connect(&services, "u1");

    let result = dispatch(
        &services,
        &router,
        &outsider,
        "chat:sendMessage",
        serde_json::json!({ "roomId": room, "content": "hi" }),
    )
    .await;
    assert!(matches!(result, Err(Error::Forbidden(_))));
}

#[tokio::test]
async fn unread_counts_are_monotonic_until_join() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store);

    let room = chat_room_id(&["u1".into(), "u2".into()]);
    for expected in 1..=3 {
        let count = services.presence.incr_unread("u2", &room).await.unwrap();
        assert_eq!(count, expected);
    }
    services.presence.clear_unread("u2", &room).await.unwrap();
    assert_eq!(services.presence.unread_count("u2", &room).await.unwrap(), 0);
}

// ============== Router ==============

#[tokio::test]
async fn unknown_targets_leave_the_connection_usable() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store);
    let router = EventRouter::with_defaults();
    let (conn, mut rx) = connect(&services, "u1");

    let result = dispatch(
        &services,
        &router,
        &conn,
        "nosuch:action",
        serde_json::Value::Null,
    )
    .await;
    assert!(matches!(result, Err(Error::NotFound(_))));

    let result = dispatch(
        &services,
        &router,
        &conn,
        "chat:nosuch",
        serde_json::Value::Null,
    )
    .await;
    assert!(matches!(result, Err(Error::NotFound(_))));

    // The connection still works
    dispatch(
        &services,
        &router,
        &conn,
        "chat:joinRoom",
        serde_json::json!({ "receiverId": "u2" }),
    )
    .await
    .unwrap();
    assert_eq!(drain(&mut rx).len(), 1);
}

#[tokio::test]
async fn malformed_tags_are_invalid_arguments() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store);
    let router = EventRouter::with_defaults();
    let (conn, _rx) = connect(&services, "u1");

    let result = dispatch(&services, &router, &conn, "noseparator", serde_json::Value::Null).await;
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

// ============== Sync and notifications ==============

#[tokio::test]
async fn sync_updates_reach_the_personal_room_and_refresh_liveness() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store.clone());
    let (_conn, mut rx) = connect(&services, "u1");

    store
        .set(&keys::connected_user("u1"), "1", Some(Duration::from_secs(5)))
        .await
        .unwrap();

    sync::dispatch(
        &services,
        SyncMessage {
            channel: SYNC_CHANNEL.to_string(),
            payload: serde_json::json!({
                "id": "u1",
                "dataType": "profile",
                "payload": { "field": "bio" },
            })
            .to_string(),
        },
    )
    .await
    .unwrap();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "dataSync:update");
    assert_eq!(events[0].data["dataType"], serde_json::json!("profile"));
    assert!(store.exists(&keys::connected_user("u1")).await.unwrap());
}

#[tokio::test]
async fn sync_updates_for_dead_sessions_evict_ghost_connections() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store);
    let (conn, mut rx) = connect(&services, "u1");

    // No liveness key: the fleet considers this user gone
    sync::dispatch(
        &services,
        SyncMessage {
            channel: SYNC_CHANNEL.to_string(),
            payload: serde_json::json!({
                "id": "u1",
                "dataType": "profile",
                "payload": {},
            })
            .to_string(),
        },
    )
    .await
    .unwrap();

    assert!(conn.cancel.is_cancelled());
    assert!(!conn.is_active());
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn notifications_are_delivered_to_the_users_connections() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store);
    let (_conn, mut rx) = connect(&services, "u1");
    let (_other, mut other_rx) = connect(&services, "u2");

    sync::dispatch(
        &services,
        SyncMessage {
            channel: sync::notification_channel("u1"),
            payload: serde_json::json!({ "type": "chat_message", "roomId": "r" }).to_string(),
        },
    )
    .await
    .unwrap();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "receiveNotification");
    assert!(drain(&mut other_rx).is_empty());
}

// ============== Connection manager ==============

#[tokio::test]
async fn unregister_drops_room_memberships() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store);
    let (conn, _rx) = connect(&services, "u1");

    services.connections.join_room(&conn.id, "roomA");
    assert_eq!(services.connections.room_connection_count("roomA"), 1);
    assert!(services.connections.is_user_connected_local("u1"));

    services.connections.unregister(&conn.id);
    assert_eq!(services.connections.room_connection_count("roomA"), 0);
    assert!(!services.connections.is_user_connected_local("u1"));
    assert_eq!(services.connections.connection_count(), 0);
}

#[tokio::test]
async fn cleanup_reaps_cancelled_connections() {
    let store = Arc::new(MemoryStore::default());
    let (services, _) = build_services(store);
    let (conn, rx) = connect(&services, "u1");
    let (_live, _live_rx) = connect(&services, "u2");

    conn.force_close();
    drop(rx);
    services.connections.cleanup_dead_connections();

    assert_eq!(services.connections.connection_count(), 1);
    assert!(!services.connections.is_user_connected_local("u1"));
    assert!(services.connections.is_user_connected_local("u2"));
}
