//! Application configuration

use std::env;
use std::time::Duration;

use crate::support::SessionPolicy;

/// Where sessions and messages are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local store for development and tests
    Memory,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    /// Browser origins allowed to call the API (empty = same-origin only)
    pub cors_allowed_origins: Vec<String>,

    // Storage
    pub storage_backend: StorageBackend,
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,

    // Session policy
    pub message_max_length: usize,
    pub edit_window_minutes: i64,
    pub delete_window_minutes: i64,
    pub peer_sessions_minor_safe: bool,

    // Content filter
    pub content_filter_url: Option<String>,
    pub content_filter_timeout_ms: u64,

    // Rate limiting
    pub rate_limit_sessions_per_minute: u32,
    pub rate_limit_messages_per_minute: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let storage_backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" => StorageBackend::Postgres,
            "memory" => StorageBackend::Memory,
            _ => {
                return Err(ConfigError::Invalid(
                    "STORAGE_BACKEND must be 'postgres' or 'memory'",
                ))
            }
        };

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),

            // Storage
            storage_backend,
            database_url,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },

            // Session policy
            message_max_length: env::var("MESSAGE_MAX_LENGTH")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .unwrap_or(4000),
            edit_window_minutes: env::var("EDIT_WINDOW_MINUTES")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            delete_window_minutes: env::var("DELETE_WINDOW_MINUTES")
                .unwrap_or_else(|_| "1440".to_string())
                .parse()
                .unwrap_or(1440),
            peer_sessions_minor_safe: env::var("PEER_SESSIONS_MINOR_SAFE")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),

            // Content filter (optional - unset disables screening)
            content_filter_url: env::var("CONTENT_FILTER_URL").ok().filter(|url| !url.is_empty()),
            content_filter_timeout_ms: env::var("CONTENT_FILTER_TIMEOUT_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .unwrap_or(2000),

            // Rate limiting
            rate_limit_sessions_per_minute: env::var("RATE_LIMIT_SESSIONS_PER_MINUTE")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
            rate_limit_messages_per_minute: env::var("RATE_LIMIT_MESSAGES_PER_MINUTE")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
        })
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            message_max_length: self.message_max_length,
            edit_window: time::Duration::minutes(self.edit_window_minutes),
            delete_window: time::Duration::minutes(self.delete_window_minutes),
            peer_sessions_minor_safe: self.peer_sessions_minor_safe,
        }
    }

    pub fn content_filter_timeout(&self) -> Duration {
        Duration::from_millis(self.content_filter_timeout_ms)
    }

    pub fn rate_limits(&self) -> harbor_shared::RateLimitConfig {
        harbor_shared::RateLimitConfig {
            sessions_per_minute: self.rate_limit_sessions_per_minute,
            messages_per_minute: self.rate_limit_messages_per_minute,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
