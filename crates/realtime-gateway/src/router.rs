//! Event router
//!
//! Inbound WebSocket events carry a `service:action` tag; the router
//! holds a registry built once at startup and dispatches to the
//! matching handler. Unknown targets answer `NotFound` without
//! touching the connection.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::backend::RequestContext;
use crate::chat;
use crate::connection::RealtimeConnection;
use crate::error::{Error, Result};
use crate::event::EventEnvelope;
use crate::gateway::Services;
use crate::sync;

/// Everything a handler needs for one event
pub struct EventContext {
    pub services: Arc<Services>,
    pub ctx: RequestContext,
    pub connection: Arc<RealtimeConnection>,
    pub payload: serde_json::Value,
}

type Handler = Arc<dyn Fn(EventContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Immutable `(service, action)` registry
pub struct EventRouter {
    routes: HashMap<(String, String), Handler>,
}

impl EventRouter {
    /// Empty router; see [`EventRouter::with_defaults`]
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Router with the built-in chat and data-sync services
    pub fn with_defaults() -> Self {
        let mut router = Self::new();
        router.register("chat", "joinRoom", |ectx| {
            Box::pin(chat::handle_join_room(ectx))
        });
        router.register("chat", "sendMessage", |ectx| {
            Box::pin(chat::handle_send_message(ectx))
        });
        router.register("chat", "leaveRoom", |ectx| {
            Box::pin(chat::handle_leave_room(ectx))
        });
        router.register("dataSync", "joinRoom", |ectx| {
            Box::pin(sync::handle_join_room(ectx))
        });
        router
    }

    /// Register a handler for a `(service, action)` pair
    pub fn register<F>(&mut self, service: &str, action: &str, handler: F)
    where
        F: Fn(EventContext) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.routes
            .insert((service.to_string(), action.to_string()), Arc::new(handler));
    }

    /// Whether a service has at least one registered action
    fn has_service(&self, service: &str) -> bool {
        self.routes.keys().any(|(s, _)| *s == service)
    }

    /// Resolve and run the handler for an envelope
    pub async fn dispatch(&self, envelope: EventEnvelope, ectx: EventContext) -> Result<()> {
        let (service, action) = envelope.parse_tag()?;
        let handler = match self
            .routes
            .get(&(service.to_string(), action.to_string()))
        {
            Some(h) => h.clone(),
            None if self.has_service(service) => {
                return Err(Error::NotFound(format!(
                    "service {service:?} has no action {action:?}"
                )))
            }
            None => return Err(Error::NotFound(format!("unknown service {service:?}"))),
        };
        handler(ectx).await
    }

    /// Registered `(service, action)` pairs, for startup logging
    pub fn targets(&self) -> Vec<(String, String)> {
        let mut targets: Vec<_> = self.routes.keys().cloned().collect();
        targets.sort();
        targets
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::with_defaults()
    }
}
