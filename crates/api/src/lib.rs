//! Harbor API Library
//!
//! HTTP and realtime server for support sessions: routing, the session state
//! machine, access control, persistence, and live delivery.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod support;
pub mod websocket;

use std::sync::Arc;

use harbor_shared::RateLimiter;

pub use config::{Config, StorageBackend};
pub use error::{ApiError, ApiResult};
pub use state::AppState;

use support::{
    ContentFilter, HttpContentFilter, MemorySessionStore, NoopFilter, PgSessionStore,
    SessionService, SessionStore, SystemClock,
};
use websocket::RealtimeChannel;

/// Wire the session service from configuration: storage backend, content
/// filter, rate limiter, and a fresh realtime channel.
pub async fn build_session_service(config: &Config) -> anyhow::Result<SessionService> {
    let store: Arc<dyn SessionStore> = match config.storage_backend {
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for postgres storage"))?;
            harbor_shared::migrate(url).await?;
            let pool = harbor_shared::create_pool(url, config.database_max_connections).await?;
            tracing::info!("Connected to Postgres and applied migrations");
            Arc::new(PgSessionStore::new(pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; sessions are lost on restart");
            Arc::new(MemorySessionStore::new())
        }
    };

    let filter: Arc<dyn ContentFilter> = match &config.content_filter_url {
        Some(url) => Arc::new(HttpContentFilter::new(
            url.clone(),
            config.content_filter_timeout(),
        )?),
        None => Arc::new(NoopFilter),
    };

    Ok(SessionService::new(
        store,
        RealtimeChannel::new(),
        filter,
        Arc::new(SystemClock),
        Arc::new(RateLimiter::new(config.rate_limits())),
        config.session_policy(),
    ))
}
