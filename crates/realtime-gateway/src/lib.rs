//! # Realtime Gateway
//!
//! Core library for an API gateway that fronts RPC-only backend
//! microservices and exposes them over HTTP and persistent WebSocket
//! connections.
//!
//! ## Features
//!
//! - **Session authentication**: bearer-token verification with a
//!   blacklist check and cached identity resolution, shared between the
//!   HTTP guard and the WebSocket handshake
//! - **Route authorization**: declarative `(resource, action)` checks
//!   against a policy backend, fail-closed
//! - **Room-based realtime delivery**: connections join rooms (one
//!   personal room per user) and events fan out per room
//! - **Presence-driven notification fanout**: active viewers get in-room
//!   broadcasts, everyone else gets unread counters and a cross-instance
//!   notification publish
//! - **Pluggable shared store**: implement [`SharedStore`] for any keyed
//!   TTL store with pub/sub; [`MemoryStore`] ships for tests and
//!   single-instance development
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use realtime_gateway::{Gateway, MemoryStore, NoopSyncSource};
//! # use realtime_gateway::backend::{AuthBackend, PolicyBackend, ChatBackend};
//! # fn backends() -> (Arc<dyn AuthBackend>, Arc<dyn PolicyBackend>, Arc<dyn ChatBackend>) { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (auth, policy, chat) = backends();
//!     Gateway::builder()
//!         .port(8080)
//!         .jwt_secret("change-me")
//!         .store(Arc::new(MemoryStore::default()))
//!         .auth_backend(auth)
//!         .policy_backend(policy)
//!         .chat_backend(chat)
//!         .sync_source(NoopSyncSource)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

pub mod auth;
pub mod backend;
mod chat;
mod connection;
mod error;
mod event;
mod gateway;
mod manager;
mod presence;
pub mod rbac;
mod router;
pub mod store;
pub mod sync;
mod ws;

// Re-exports
pub use auth::{AuthMode, IdentityResolver, TokenVerifier};
pub use backend::{RequestContext, UserContext};
pub use chat::{chat_room_id, room_participants};
pub use connection::RealtimeConnection;
pub use error::{Error, Result};
pub use event::{EventEnvelope, RealtimeEvent};
pub use gateway::{Gateway, GatewayBuilder, GatewayState, Services};
pub use manager::{personal_room, ConnectionManager};
pub use presence::PresenceStore;
pub use rbac::RequiredPermission;
pub use router::{EventContext, EventRouter};
pub use store::{MemoryStore, SharedStore};
pub use sync::{NoopSyncSource, SyncHandler, SyncMessage, SyncSource};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
