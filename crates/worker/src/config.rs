//! Worker configuration

use std::env;

use time::Duration;

/// Every 10 minutes, on the minute (seconds field first)
pub const DEFAULT_SWEEP_CRON: &str = "0 */10 * * * *";

/// Upper bounds on the stale thresholds (ten years)
pub const MAX_STALE_WAITING_HOURS: i64 = 24 * 365 * 10;
pub const MAX_STALE_ACTIVE_DAYS: i64 = 365 * 10;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    /// Close WAITING sessions nobody claimed within this many hours
    pub stale_waiting_hours: i64,
    /// Close ACTIVE sessions idle for this many days
    pub stale_active_days: i64,
    pub sweep_cron: String,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, WorkerConfigError> {
        let database_url = env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .ok_or(WorkerConfigError::Missing("DATABASE_URL"))?;

        let stale_waiting_hours: i64 = env::var("STALE_WAITING_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .unwrap_or(24);
        let stale_active_days: i64 = env::var("STALE_ACTIVE_DAYS")
            .unwrap_or_else(|_| "14".to_string())
            .parse()
            .unwrap_or(14);
        if stale_waiting_hours <= 0 || stale_active_days <= 0 {
            return Err(WorkerConfigError::Invalid(
                "STALE_WAITING_HOURS and STALE_ACTIVE_DAYS must be positive",
            ));
        }
        if stale_waiting_hours > MAX_STALE_WAITING_HOURS
            || stale_active_days > MAX_STALE_ACTIVE_DAYS
        {
            return Err(WorkerConfigError::Invalid(
                "STALE_WAITING_HOURS and STALE_ACTIVE_DAYS must be at most ten years",
            ));
        }

        Ok(Self {
            database_url,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .unwrap_or(2),
            stale_waiting_hours,
            stale_active_days,
            sweep_cron: env::var("SWEEP_CRON")
                .ok()
                .filter(|cron| !cron.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SWEEP_CRON.to_string()),
        })
    }

    pub fn waiting_max_age(&self) -> Duration {
        Duration::hours(self.stale_waiting_hours)
    }

    pub fn active_max_idle(&self) -> Duration {
        Duration::days(self.stale_active_days)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
