//! Database pool and migrations

use sqlx::migrate::MigrateError;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::{str::FromStr, time::Duration};

/// Create the request-serving pool.
/// Statement cache is off so the pool also works behind PgBouncer in transaction mode.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let options = PgConnectOptions::from_str(database_url)?.statement_cache_capacity(0);

    // Message sends wait on this; fail fast rather than queue behind a stuck pool
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .min_connections(0)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(120))
        .max_lifetime(Duration::from_secs(900))
        .connect_with(options)
        .await
}

/// Single-connection pool with a long acquire timeout, for migrations only
pub async fn create_migration_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let options = PgConnectOptions::from_str(database_url)?.statement_cache_capacity(0);

    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(120))
        .connect_with(options)
        .await
}

/// Apply embedded migrations on `pool`
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}

/// Open a migration pool, apply pending migrations, and close it again.
/// Safe to call from several processes at once; sqlx takes an advisory lock.
pub async fn migrate(database_url: &str) -> Result<(), MigrateError> {
    let pool = create_migration_pool(database_url).await?;
    let result = run_migrations(&pool).await;
    pool.close().await;
    result
}
