//! gRPC backend clients for the realtime gateway
//!
//! Implements the gateway's backend traits over tonic channels:
//! - `GrpcAuthBackend` -> `auth.AuthService`
//! - `GrpcPolicyBackend` -> `rbac.RBACService`
//! - `GrpcChatBackend` -> `chat.ChatService`
//!
//! Channels come from a [`ClientPool`] that builds them lazily and
//! recycles them by age, so long-lived gateway processes keep load
//! spread across backend replicas.

mod clients;
mod error;
mod pool;
mod proto;

pub use clients::{GrpcAuthBackend, GrpcChatBackend, GrpcPolicyBackend};
pub use error::from_rpc_status;
pub use pool::{ClientPool, ServiceDescriptor};
