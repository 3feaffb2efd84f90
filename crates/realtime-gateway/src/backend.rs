//! Backend service traits and data transfer types
//!
//! The gateway never talks to a database; every domain operation is
//! delegated to an RPC backend behind one of these traits. The gRPC
//! adapter crate provides the production implementations.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Resolved identity of an authenticated user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub user_id: String,
    pub slug_id: String,
    pub username: String,
    pub role: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub character_summary: Option<String>,
}

/// Per-request context propagated to every backend call
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Correlation ID for this request or event
    pub trace_id: String,
    /// Stable ID for the session (HTTP request or WebSocket connection)
    pub session_id: String,
    /// Present once authentication has run
    pub user: Option<Arc<UserContext>>,
}

impl RequestContext {
    /// Fresh context with generated IDs
    pub fn new() -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            session_id: uuid::Uuid::new_v4().to_string(),
            user: None,
        }
    }

    /// Context scoped to an authenticated session
    pub fn for_session(session_id: impl Into<String>, user: Arc<UserContext>) -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            user: Some(user),
        }
    }

    /// ID of the authenticated user, if any
    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.user_id.as_str())
    }
}

/// Token rotation request body / RPC input
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateTokenRequest {
    pub user_id: String,
    pub refresh_token: String,
}

/// Fresh token pair issued by the auth backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

/// Identity resolution and token lifecycle
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Resolve a user from the slug carried in their token
    async fn get_user_from_slug(&self, ctx: &RequestContext, slug_id: &str)
        -> Result<UserContext>;

    /// Resolve several users at once
    async fn get_users_from_slugs(
        &self,
        ctx: &RequestContext,
        slug_ids: &[String],
    ) -> Result<Vec<UserContext>>;

    /// Exchange a refresh token for a fresh pair
    async fn rotate_token(
        &self,
        ctx: &RequestContext,
        req: RotateTokenRequest,
    ) -> Result<RotateTokenResponse>;
}

/// RBAC policy queries and management
#[async_trait]
pub trait PolicyBackend: Send + Sync {
    /// Whether the user may perform `action` on `resource`
    async fn check_permission(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        resource: &str,
        action: &str,
    ) -> Result<bool>;

    async fn create_role(&self, ctx: &RequestContext, name: &str) -> Result<()>;

    async fn create_resource(&self, ctx: &RequestContext, name: &str) -> Result<()>;

    async fn grant_access(
        &self,
        ctx: &RequestContext,
        role: &str,
        resource: &str,
        action: &str,
    ) -> Result<()>;
}

/// A persisted chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message_id: String,
    pub room_id: String,
    pub user_id: String,
    pub sender_name: String,
    pub content: String,
    pub created_at: String,
}

/// Input for persisting a chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub room_id: String,
    pub user_id: String,
    pub user_slug_id: String,
    pub participants: Vec<String>,
    pub content: String,
}

/// Paged history query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryRequest {
    pub room_id: String,
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    50
}

/// Chat persistence
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Persist a message; the returned record carries the canonical ID
    /// and timestamp used for fanout
    async fn send_message(
        &self,
        ctx: &RequestContext,
        req: SendMessageRequest,
    ) -> Result<ChatMessage>;

    /// Fetch room history, newest first
    async fn chat_history(
        &self,
        ctx: &RequestContext,
        req: ChatHistoryRequest,
    ) -> Result<Vec<ChatMessage>>;
}
