//! In-memory rate limiting
//!
//! Fixed one-minute windows keyed by action and user. Limits are supplied by
//! the caller (see `RATE_LIMIT_SESSIONS_PER_MINUTE` and
//! `RATE_LIMIT_MESSAGES_PER_MINUTE` in the API config).

use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Per-minute limits for rate-limited actions
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub sessions_per_minute: u32,
    pub messages_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            sessions_per_minute: 3,
            messages_per_minute: 30,
        }
    }
}

/// Rate limit check result
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after_seconds: Option<u32>,
}

/// Fixed-window counters: key -> (count, window_start)
#[derive(Default)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: RwLock<HashMap<String, (u32, i64)>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Check session creation for a requester
    pub async fn check_session_creation(&self, user_id: Uuid) -> RateLimitResult {
        let key = format!("ratelimit:session:{}", user_id);
        self.check(&key, self.config.sessions_per_minute).await
    }

    /// Check message sends for a sender
    pub async fn check_message_send(&self, user_id: Uuid) -> RateLimitResult {
        let key = format!("ratelimit:message:{}", user_id);
        self.check(&key, self.config.messages_per_minute).await
    }

    async fn check(&self, key: &str, limit: u32) -> RateLimitResult {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.check_at(key, limit, now).await
    }

    /// Check and increment a window at an explicit unix timestamp
    pub async fn check_at(&self, key: &str, limit: u32, now: i64) -> RateLimitResult {
        let window_start = now - now.rem_euclid(60);

        let mut windows = self.windows.write().await;
        let entry = windows.entry(key.to_string()).or_insert((0, window_start));

        // Reset if in new window
        if entry.1 != window_start {
            entry.0 = 0;
            entry.1 = window_start;
        }

        let allowed = entry.0 < limit;
        if allowed {
            entry.0 += 1;
        }

        RateLimitResult {
            allowed,
            remaining: limit.saturating_sub(entry.0),
            retry_after_seconds: if allowed {
                None
            } else {
                Some((window_start + 60 - now) as u32)
            },
        }
    }

    /// Drop windows older than an hour (call periodically)
    pub async fn cleanup(&self) {
        let cutoff = OffsetDateTime::now_utc().unix_timestamp() - 3600;
        let mut windows = self.windows.write().await;
        windows.retain(|_, (_, start)| *start > cutoff);
    }
}
