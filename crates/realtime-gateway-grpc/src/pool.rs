//! Channel pool with age-based recycling

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use realtime_gateway::{Error, Result};
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

/// Connection settings for one backend service
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    /// Fully-qualified proto service name (e.g. "auth.AuthService")
    pub service_name: String,
    /// Endpoint URL (e.g. "http://auth-service:50051")
    pub endpoint: String,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    /// Channels older than this are rebuilt on next use
    pub max_connection_age: Duration,
    pub max_message_size: usize,
    /// Per-call deadline
    pub rpc_timeout: Duration,
}

impl ServiceDescriptor {
    pub fn new(service_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            endpoint: endpoint.into(),
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
            max_connection_age: Duration::from_secs(300),
            max_message_size: 4 * 1024 * 1024,
            rpc_timeout: Duration::from_secs(5),
        }
    }
}

struct PooledChannel {
    channel: Channel,
    created_at: Instant,
}

/// Lazily-built channels, keyed by service name
///
/// `connect_lazy` keeps startup independent of backend availability;
/// the first RPC carries the connection cost. Recycling by age keeps a
/// long-lived gateway from pinning a single backend replica forever.
pub struct ClientPool {
    channels: DashMap<String, PooledChannel>,
    closed: AtomicBool,
}

impl ClientPool {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Channel for a service, building or recycling as needed
    pub fn channel(&self, desc: &ServiceDescriptor) -> Result<Channel> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("client pool closed".to_string()));
        }

        if let Some(entry) = self.channels.get(&desc.service_name) {
            if entry.created_at.elapsed() < desc.max_connection_age {
                return Ok(entry.channel.clone());
            }
            debug!(service = %desc.service_name, "Recycling aged channel");
        }

        let channel = Self::build_channel(desc)?;
        self.channels.insert(
            desc.service_name.clone(),
            PooledChannel {
                channel: channel.clone(),
                created_at: Instant::now(),
            },
        );
        Ok(channel)
    }

    fn build_channel(desc: &ServiceDescriptor) -> Result<Channel> {
        let endpoint = Endpoint::from_shared(desc.endpoint.clone())
            .map_err(|e| Error::Internal(format!("invalid endpoint {}: {e}", desc.endpoint)))?
            .http2_keep_alive_interval(desc.keepalive_interval)
            .keep_alive_timeout(desc.keepalive_timeout)
            .keep_alive_while_idle(true);
        Ok(endpoint.connect_lazy())
    }

    /// Drop every channel; idempotent
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.channels.clear();
            info!("Client pool closed");
        }
    }

    /// Number of live channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new()
    }
}
