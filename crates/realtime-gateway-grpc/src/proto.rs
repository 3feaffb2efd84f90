//! Hand-written prost messages for the backend services
//!
//! Field numbers are part of the wire contract with the backends; keep
//! them stable.

// ===== auth.AuthService =====

#[derive(Clone, PartialEq, prost::Message)]
pub struct UserRequest {
    #[prost(string, tag = "1")]
    pub slug_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UsersRequest {
    #[prost(string, repeated, tag = "1")]
    pub slug_ids: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UserReply {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(string, tag = "2")]
    pub slug_id: String,
    #[prost(string, tag = "3")]
    pub username: String,
    #[prost(string, tag = "4")]
    pub role: String,
    #[prost(string, optional, tag = "5")]
    pub email: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub character_summary: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UsersReply {
    #[prost(message, repeated, tag = "1")]
    pub users: Vec<UserReply>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RotateTokenRequest {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(string, tag = "2")]
    pub refresh_token: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RotateTokenReply {
    #[prost(string, tag = "1")]
    pub access_token: String,
    #[prost(string, tag = "2")]
    pub refresh_token: String,
}

// ===== rbac.RBACService =====

#[derive(Clone, PartialEq, prost::Message)]
pub struct PermissionRequest {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(string, tag = "2")]
    pub resource: String,
    #[prost(string, tag = "3")]
    pub action: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PermissionReply {
    #[prost(bool, tag = "1")]
    pub allowed: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RoleRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ResourceRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GrantRequest {
    #[prost(string, tag = "1")]
    pub role: String,
    #[prost(string, tag = "2")]
    pub resource: String,
    #[prost(string, tag = "3")]
    pub action: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Empty {}

// ===== chat.ChatService =====

#[derive(Clone, PartialEq, prost::Message)]
pub struct SendMessageRequest {
    #[prost(string, tag = "1")]
    pub room_id: String,
    #[prost(string, tag = "2")]
    pub user_id: String,
    #[prost(string, tag = "3")]
    pub user_slug_id: String,
    #[prost(string, repeated, tag = "4")]
    pub participants: Vec<String>,
    #[prost(string, tag = "5")]
    pub content: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ChatMessage {
    #[prost(string, tag = "1")]
    pub message_id: String,
    #[prost(string, tag = "2")]
    pub room_id: String,
    #[prost(string, tag = "3")]
    pub user_id: String,
    #[prost(string, tag = "4")]
    pub sender_name: String,
    #[prost(string, tag = "5")]
    pub content: String,
    #[prost(string, tag = "6")]
    pub created_at: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SendMessageReply {
    #[prost(message, optional, tag = "1")]
    pub message: Option<ChatMessage>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ChatHistoryRequest {
    #[prost(string, tag = "1")]
    pub room_id: String,
    #[prost(uint32, tag = "2")]
    pub page: u32,
    #[prost(uint32, tag = "3")]
    pub page_size: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ChatHistoryReply {
    #[prost(message, repeated, tag = "1")]
    pub messages: Vec<ChatMessage>,
}
