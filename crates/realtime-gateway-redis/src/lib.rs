//! Redis adapters for the realtime gateway
//!
//! This crate provides:
//! - `RedisStore`: the shared keyed store (identity cache, blacklist,
//!   presence, liveness keys) over a Redis connection manager
//! - `RedisSyncSource`: subscribes to the data-sync channel and the
//!   per-user notification pattern

mod pubsub;
mod store;

pub use pubsub::RedisSyncSource;
pub use store::RedisStore;
