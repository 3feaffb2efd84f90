//! Backend trait implementations over manual tonic unary calls

use std::sync::Arc;

use async_trait::async_trait;
use realtime_gateway::backend::{
    AuthBackend, ChatBackend, ChatHistoryRequest, ChatMessage, PolicyBackend, RequestContext,
    RotateTokenRequest, RotateTokenResponse, SendMessageRequest, UserContext,
};
use realtime_gateway::{Error, Result};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::MetadataValue;
use tracing::debug;

use crate::error::from_rpc_status;
use crate::pool::{ClientPool, ServiceDescriptor};
use crate::proto;

/// One unary RPC: pooled channel, readiness, metadata, deadline
async fn unary<Req, Resp>(
    pool: &ClientPool,
    desc: &ServiceDescriptor,
    path: &'static str,
    ctx: &RequestContext,
    message: Req,
) -> Result<Resp>
where
    Req: prost::Message + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
{
    let channel = pool.channel(desc)?;
    let mut grpc =
        tonic::client::Grpc::new(channel).max_decoding_message_size(desc.max_message_size);
    grpc.ready()
        .await
        .map_err(|e| Error::Unavailable(format!("{} not ready: {e}", desc.service_name)))?;

    let mut request = tonic::Request::new(message);
    request.set_timeout(desc.rpc_timeout);
    let metadata = request.metadata_mut();
    if let Ok(value) = MetadataValue::try_from(ctx.trace_id.as_str()) {
        metadata.insert("x-trace-id", value);
    }
    if let Ok(value) = MetadataValue::try_from(ctx.session_id.as_str()) {
        metadata.insert("x-session-id", value);
    }
    if let Some(user_id) = ctx.user_id() {
        if let Ok(value) = MetadataValue::try_from(user_id) {
            metadata.insert("user-id", value);
        }
    }

    debug!(service = %desc.service_name, path, trace_id = %ctx.trace_id, "Backend call");
    let codec = tonic_prost::ProstCodec::default();
    grpc.unary(request, PathAndQuery::from_static(path), codec)
        .await
        .map(|response| response.into_inner())
        .map_err(|status| from_rpc_status(&status))
}

fn user_from_reply(reply: proto::UserReply) -> UserContext {
    UserContext {
        user_id: reply.user_id,
        slug_id: reply.slug_id,
        username: reply.username,
        role: reply.role,
        email: reply.email,
        character_summary: reply.character_summary,
    }
}

/// `auth.AuthService` client
pub struct GrpcAuthBackend {
    pool: Arc<ClientPool>,
    desc: ServiceDescriptor,
}

impl GrpcAuthBackend {
    pub fn new(pool: Arc<ClientPool>, endpoint: impl Into<String>) -> Self {
        Self {
            pool,
            desc: ServiceDescriptor::new("auth.AuthService", endpoint),
        }
    }

    pub fn with_descriptor(pool: Arc<ClientPool>, desc: ServiceDescriptor) -> Self {
        Self { pool, desc }
    }
}

#[async_trait]
impl AuthBackend for GrpcAuthBackend {
    async fn get_user_from_slug(&self, ctx: &RequestContext, slug_id: &str) -> Result<UserContext> {
        let reply: proto::UserReply = unary(
            &self.pool,
            &self.desc,
            "/auth.AuthService/GetUserFromSlug",
            ctx,
            proto::UserRequest {
                slug_id: slug_id.to_string(),
            },
        )
        .await?;
        Ok(user_from_reply(reply))
    }

    async fn get_users_from_slugs(
        &self,
        ctx: &RequestContext,
        slug_ids: &[String],
    ) -> Result<Vec<UserContext>> {
        let reply: proto::UsersReply = unary(
            &self.pool,
            &self.desc,
            "/auth.AuthService/GetUsersFromSlugs",
            ctx,
            proto::UsersRequest {
                slug_ids: slug_ids.to_vec(),
            },
        )
        .await?;
        Ok(reply.users.into_iter().map(user_from_reply).collect())
    }

    async fn rotate_token(
        &self,
        ctx: &RequestContext,
        req: RotateTokenRequest,
    ) -> Result<RotateTokenResponse> {
        let reply: proto::RotateTokenReply = unary(
            &self.pool,
            &self.desc,
            "/auth.AuthService/RotateToken",
            ctx,
            proto::RotateTokenRequest {
                user_id: req.user_id,
                refresh_token: req.refresh_token,
            },
        )
        .await?;
        Ok(RotateTokenResponse {
            access_token: reply.access_token,
            refresh_token: reply.refresh_token,
        })
    }
}

/// `rbac.RBACService` client
pub struct GrpcPolicyBackend {
    pool: Arc<ClientPool>,
    desc: ServiceDescriptor,
}

impl GrpcPolicyBackend {
    pub fn new(pool: Arc<ClientPool>, endpoint: impl Into<String>) -> Self {
        Self {
            pool,
            desc: ServiceDescriptor::new("rbac.RBACService", endpoint),
        }
    }

    pub fn with_descriptor(pool: Arc<ClientPool>, desc: ServiceDescriptor) -> Self {
        Self { pool, desc }
    }
}

#[async_trait]
impl PolicyBackend for GrpcPolicyBackend {
    async fn check_permission(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        resource: &str,
        action: &str,
    ) -> Result<bool> {
        let reply: proto::PermissionReply = unary(
            &self.pool,
            &self.desc,
            "/rbac.RBACService/CheckPermission",
            ctx,
            proto::PermissionRequest {
                user_id: user_id.to_string(),
                resource: resource.to_string(),
                action: action.to_string(),
            },
        )
        .await?;
        Ok(reply.allowed)
    }

    async fn create_role(&self, ctx: &RequestContext, name: &str) -> Result<()> {
        let _: proto::Empty = unary(
            &self.pool,
            &self.desc,
            "/rbac.RBACService/CreateRole",
            ctx,
            proto::RoleRequest {
                name: name.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    async fn create_resource(&self, ctx: &RequestContext, name: &str) -> Result<()> {
        let _: proto::Empty = unary(
            &self.pool,
            &self.desc,
            "/rbac.RBACService/CreateResource",
            ctx,
            proto::ResourceRequest {
                name: name.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    async fn grant_access(
        &self,
        ctx: &RequestContext,
        role: &str,
        resource: &str,
        action: &str,
    ) -> Result<()> {
        let _: proto::Empty = unary(
            &self.pool,
            &self.desc,
            "/rbac.RBACService/GrantAccessToRole",
            ctx,
            proto::GrantRequest {
                role: role.to_string(),
                resource: resource.to_string(),
                action: action.to_string(),
            },
        )
        .await?;
        Ok(())
    }
}

/// `chat.ChatService` client
pub struct GrpcChatBackend {
    pool: Arc<ClientPool>,
    desc: ServiceDescriptor,
}

impl GrpcChatBackend {
    pub fn new(pool: Arc<ClientPool>, endpoint: impl Into<String>) -> Self {
        Self {
            pool,
            desc: ServiceDescriptor::new("chat.ChatService", endpoint),
        }
    }

    pub fn with_descriptor(pool: Arc<ClientPool>, desc: ServiceDescriptor) -> Self {
        Self { pool, desc }
    }
}

fn message_from_proto(message: proto::ChatMessage) -> ChatMessage {
    ChatMessage {
        message_id: message.message_id,
        room_id: message.room_id,
        user_id: message.user_id,
        sender_name: message.sender_name,
        content: message.content,
        created_at: message.created_at,
    }
}

#[async_trait]
impl ChatBackend for GrpcChatBackend {
    async fn send_message(
        &self,
        ctx: &RequestContext,
        req: SendMessageRequest,
    ) -> Result<ChatMessage> {
        let reply: proto::SendMessageReply = unary(
            &self.pool,
            &self.desc,
            "/chat.ChatService/SendMessage",
            ctx,
            proto::SendMessageRequest {
                room_id: req.room_id,
                user_id: req.user_id,
                user_slug_id: req.user_slug_id,
                participants: req.participants,
                content: req.content,
            },
        )
        .await?;
        let message = reply
            .message
            .ok_or_else(|| Error::Internal("chat backend returned no message".to_string()))?;
        Ok(message_from_proto(message))
    }

    async fn chat_history(
        &self,
        ctx: &RequestContext,
        req: ChatHistoryRequest,
    ) -> Result<Vec<ChatMessage>> {
        let reply: proto::ChatHistoryReply = unary(
            &self.pool,
            &self.desc,
            "/chat.ChatService/GetChatHistory",
            ctx,
            proto::ChatHistoryRequest {
                room_id: req.room_id,
                page: req.page,
                page_size: req.page_size,
            },
        )
        .await?;
        Ok(reply.messages.into_iter().map(message_from_proto).collect())
    }
}
