use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    pub backends: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret the token issuer signs access tokens with
    #[serde(default)]
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RedisConfig {
    /// Redis URL, e.g. "redis://localhost:6379". If empty, the gateway
    /// runs on the in-memory store (single-instance only).
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub auth_url: String,
    pub rbac_url: String,
    pub chat_url: String,
}

fn default_port() -> u16 {
    8080
}

fn default_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config: Self = if Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self {
                server: ServerConfig {
                    port: default_port(),
                    instance_id: default_instance_id(),
                },
                auth: AuthConfig {
                    jwt_secret: String::new(),
                },
                redis: RedisConfig::default(),
                backends: BackendConfig {
                    auth_url: String::new(),
                    rbac_url: String::new(),
                    chat_url: String::new(),
                },
            }
        };

        // Environment variables override the config file
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.server.port = p;
            }
        }
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            config.auth.jwt_secret = secret;
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            config.redis.url = Some(url);
        }
        if let Ok(url) = std::env::var("AUTH_BACKEND_URL") {
            config.backends.auth_url = url;
        }
        if let Ok(url) = std::env::var("RBAC_BACKEND_URL") {
            config.backends.rbac_url = url;
        }
        if let Ok(url) = std::env::var("CHAT_BACKEND_URL") {
            config.backends.chat_url = url;
        }

        if config.auth.jwt_secret.is_empty() {
            anyhow::bail!("JWT_SECRET environment variable is required");
        }
        if config.backends.auth_url.is_empty() {
            anyhow::bail!("AUTH_BACKEND_URL environment variable is required");
        }
        if config.backends.rbac_url.is_empty() {
            anyhow::bail!("RBAC_BACKEND_URL environment variable is required");
        }
        if config.backends.chat_url.is_empty() {
            anyhow::bail!("CHAT_BACKEND_URL environment variable is required");
        }

        Ok(config)
    }

    pub fn test_config() -> Self {
        Self {
            server: ServerConfig {
                port: std::env::var("PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8080),
                instance_id: format!("test-{}", &default_instance_id()[..8]),
            },
            auth: AuthConfig {
                jwt_secret: std::env::var("JWT_SECRET")
                    .unwrap_or_else(|_| "test-secret".to_string()),
            },
            redis: RedisConfig {
                url: std::env::var("REDIS_URL").ok(),
            },
            backends: BackendConfig {
                auth_url: "http://localhost:50051".to_string(),
                rbac_url: "http://localhost:50052".to_string(),
                chat_url: "http://localhost:50053".to_string(),
            },
        }
    }
}
