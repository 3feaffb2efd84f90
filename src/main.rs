mod config;
mod routes;

use std::sync::Arc;

use realtime_gateway::{Gateway, MemoryStore, SharedStore};
use realtime_gateway_grpc::{ClientPool, GrpcAuthBackend, GrpcChatBackend, GrpcPolicyBackend};
use realtime_gateway_redis::{RedisStore, RedisSyncSource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let test_mode = std::env::var("TEST_MODE")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let config = if test_mode {
        tracing::info!("Running in TEST MODE");
        AppConfig::test_config()
    } else {
        AppConfig::load()?
    };

    tracing::info!(
        instance_id = %config.server.instance_id,
        redis = ?config.redis.url,
        auth_backend = %config.backends.auth_url,
        rbac_backend = %config.backends.rbac_url,
        chat_backend = %config.backends.chat_url,
        test_mode,
        "Gateway starting"
    );

    // Shared store: Redis when configured and reachable, else in-memory
    // (single-instance only, presence is not shared across the fleet)
    let store: Arc<dyn SharedStore> = match &config.redis.url {
        Some(url) => {
            let redis = RedisStore::new();
            match redis.connect(url).await {
                Ok(_) => Arc::new(redis),
                Err(e) => {
                    tracing::warn!(error = %e, "Redis unavailable, falling back to memory store");
                    Arc::new(MemoryStore::default())
                }
            }
        }
        None => {
            tracing::info!("Redis not configured, using memory store");
            Arc::new(MemoryStore::default())
        }
    };

    let pool = Arc::new(ClientPool::new());
    let auth_backend = Arc::new(GrpcAuthBackend::new(pool.clone(), config.backends.auth_url));
    let policy_backend = Arc::new(GrpcPolicyBackend::new(pool.clone(), config.backends.rbac_url));
    let chat_backend = Arc::new(GrpcChatBackend::new(pool.clone(), config.backends.chat_url));

    let mut builder = Gateway::builder()
        .port(config.server.port)
        .jwt_secret(config.auth.jwt_secret.clone())
        .instance_id(config.server.instance_id)
        .store(store)
        .auth_backend(auth_backend)
        .policy_backend(policy_backend)
        .chat_backend(chat_backend)
        .api_routes(routes::api_routes);

    if let Some(url) = &config.redis.url {
        builder = builder.sync_source(RedisSyncSource::with_defaults(url.clone()));
    }

    let result = builder.build()?.run().await;
    pool.close();
    result
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway=info,realtime_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}
