//! Gateway builder and runner

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::{IdentityResolver, TokenVerifier};
use crate::backend::{AuthBackend, ChatBackend, PolicyBackend};
use crate::manager::ConnectionManager;
use crate::presence::PresenceStore;
use crate::router::EventRouter;
use crate::store::SharedStore;
use crate::sync::{self, SyncSource};
use crate::ws;

/// Shared collaborators every handler reaches through
pub struct Services {
    pub store: Arc<dyn SharedStore>,
    pub auth: Arc<dyn AuthBackend>,
    pub policy: Arc<dyn PolicyBackend>,
    pub chat: Arc<dyn ChatBackend>,
    pub verifier: TokenVerifier,
    pub identity: IdentityResolver,
    pub connections: ConnectionManager,
    pub presence: PresenceStore,
    pub instance_id: String,
    pub handshake_timeout: Duration,
}

/// Axum application state
#[derive(Clone)]
pub struct GatewayState {
    pub services: Arc<Services>,
    pub events: Arc<EventRouter>,
}

/// Closure producing the HTTP API routes, given the shared state
pub type ApiRoutes = Box<dyn FnOnce(GatewayState) -> Router<GatewayState> + Send>;

/// Gateway configuration and runner
pub struct Gateway {
    port: u16,
    state: GatewayState,
    sync_source: Arc<dyn SyncSource>,
    cleanup_interval: Duration,
    api_routes: Option<ApiRoutes>,
}

impl Gateway {
    /// Create a new gateway builder
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// State handle, for embedding the gateway in an existing server
    pub fn state(&self) -> GatewayState {
        self.state.clone()
    }

    /// Run the gateway server
    pub async fn run(self) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        let services = self.state.services.clone();

        tracing::info!(
            port = self.port,
            store = services.store.name(),
            source = self.sync_source.name(),
            instance_id = %services.instance_id,
            "Starting realtime gateway"
        );
        for (service, action) in self.state.events.targets() {
            tracing::debug!(service, action, "Registered event target");
        }

        // Start broker subscription
        let source = self.sync_source.clone();
        let handler = sync::to_handler(services.clone());
        let source_cancel = cancel.clone();
        let source_name = source.name();
        tokio::spawn(async move {
            if let Err(e) = source.start(handler, source_cancel).await {
                tracing::error!(error = %e, source = source_name, "Sync source error");
            }
        });

        // Start cleanup task
        let cleanup_manager = services.connections.clone();
        let cleanup_cancel = cancel.clone();
        let cleanup_interval = self.cleanup_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);
            loop {
                tokio::select! {
                    _ = cleanup_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let before = cleanup_manager.connection_count();
                        cleanup_manager.cleanup_dead_connections();
                        let after = cleanup_manager.connection_count();
                        tracing::debug!(
                            connections = after,
                            cleaned = before.saturating_sub(after),
                            "Connection cleanup"
                        );
                    }
                }
            }
        });

        // Build router
        let mut app = Router::new()
            .route("/health", get(|| async { "OK" }))
            .route("/ready", get(|| async { "READY" }))
            .route("/realtime", get(ws::realtime_handler));

        if let Some(api_routes) = self.api_routes {
            app = app.merge(api_routes(self.state.clone()));
        }

        let app = app
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!("Listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        let cancel_for_shutdown = cancel.clone();
        let shutdown_signal = async move {
            let ctrl_c = async {
                tokio::signal::ctrl_c()
                    .await
                    .expect("Failed to install Ctrl+C handler");
            };

            #[cfg(unix)]
            let terminate = async {
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to install SIGTERM handler")
                    .recv()
                    .await;
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => tracing::info!("Received Ctrl+C"),
                _ = terminate => tracing::info!("Received SIGTERM"),
            }

            cancel_for_shutdown.cancel();
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        tracing::info!("Gateway shutdown complete");
        Ok(())
    }
}

/// Builder for Gateway
pub struct GatewayBuilder {
    port: u16,
    jwt_secret: Option<String>,
    store: Option<Arc<dyn SharedStore>>,
    auth_backend: Option<Arc<dyn AuthBackend>>,
    policy_backend: Option<Arc<dyn PolicyBackend>>,
    chat_backend: Option<Arc<dyn ChatBackend>>,
    sync_source: Option<Arc<dyn SyncSource>>,
    events: Option<EventRouter>,
    instance_id: Option<String>,
    cleanup_interval: Duration,
    handshake_timeout: Duration,
    api_routes: Option<ApiRoutes>,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self {
            port: 8080,
            jwt_secret: None,
            store: None,
            auth_backend: None,
            policy_backend: None,
            chat_backend: None,
            sync_source: None,
            events: None,
            instance_id: None,
            cleanup_interval: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            api_routes: None,
        }
    }
}

impl GatewayBuilder {
    /// Set the server port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the token-signing secret
    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = Some(secret.into());
        self
    }

    /// Set the shared store
    pub fn store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the auth backend
    pub fn auth_backend(mut self, backend: Arc<dyn AuthBackend>) -> Self {
        self.auth_backend = Some(backend);
        self
    }

    /// Set the policy backend
    pub fn policy_backend(mut self, backend: Arc<dyn PolicyBackend>) -> Self {
        self.policy_backend = Some(backend);
        self
    }

    /// Set the chat backend
    pub fn chat_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.chat_backend = Some(backend);
        self
    }

    /// Set the broker subscription source
    pub fn sync_source<S: SyncSource>(mut self, source: S) -> Self {
        self.sync_source = Some(Arc::new(source));
        self
    }

    /// Replace the default event router
    pub fn events(mut self, events: EventRouter) -> Self {
        self.events = Some(events);
        self
    }

    /// Set the instance ID
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Set the dead-connection cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set how long an accepted socket may stay unauthenticated
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Mount additional HTTP routes built from the gateway state
    pub fn api_routes<F>(mut self, routes: F) -> Self
    where
        F: FnOnce(GatewayState) -> Router<GatewayState> + Send + 'static,
    {
        self.api_routes = Some(Box::new(routes));
        self
    }

    /// Build the gateway
    pub fn build(self) -> anyhow::Result<Gateway> {
        let jwt_secret = self
            .jwt_secret
            .ok_or_else(|| anyhow::anyhow!("JWT secret is required"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Store is required"))?;
        let auth_backend = self
            .auth_backend
            .ok_or_else(|| anyhow::anyhow!("Auth backend is required"))?;
        let policy_backend = self
            .policy_backend
            .ok_or_else(|| anyhow::anyhow!("Policy backend is required"))?;
        let chat_backend = self
            .chat_backend
            .ok_or_else(|| anyhow::anyhow!("Chat backend is required"))?;
        let sync_source = self
            .sync_source
            .unwrap_or_else(|| Arc::new(sync::NoopSyncSource));
        let instance_id = self
            .instance_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let services = Arc::new(Services {
            verifier: TokenVerifier::new(&jwt_secret),
            identity: IdentityResolver::new(store.clone(), auth_backend.clone()),
            connections: ConnectionManager::new(instance_id.clone()),
            presence: PresenceStore::new(store.clone()),
            store,
            auth: auth_backend,
            policy: policy_backend,
            chat: chat_backend,
            instance_id,
            handshake_timeout: self.handshake_timeout,
        });

        Ok(Gateway {
            port: self.port,
            state: GatewayState {
                services,
                events: Arc::new(self.events.unwrap_or_default()),
            },
            sync_source,
            cleanup_interval: self.cleanup_interval,
            api_routes: self.api_routes,
        })
    }
}
