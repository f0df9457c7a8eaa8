//! Harbor background worker
//!
//! Runs lifecycle jobs on a cron schedule against the shared database.

mod config;
mod stale_sessions;

use std::sync::Arc;

use anyhow::Context;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use harbor_api::support::{PgSessionStore, SystemClock};

use crate::config::WorkerConfig;
use crate::stale_sessions::StaleSessionSweeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,harbor_worker=debug".into());
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = WorkerConfig::from_env().context("failed to load worker configuration")?;

    harbor_shared::migrate(&config.database_url)
        .await
        .context("failed to apply migrations")?;
    let pool = harbor_shared::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("failed to connect to database")?;

    let sweeper = Arc::new(StaleSessionSweeper::new(
        Arc::new(PgSessionStore::new(pool)),
        Arc::new(SystemClock),
        config.waiting_max_age(),
        config.active_max_idle(),
    ));

    let scheduler = JobScheduler::new().await?;

    let job_sweeper = sweeper.clone();
    let sweep_job = Job::new_async(config.sweep_cron.as_str(), move |_id, _scheduler| {
        let sweeper = job_sweeper.clone();
        Box::pin(async move {
            match sweeper.sweep().await {
                Ok(report) if report.scanned > 0 => {
                    info!(
                        scanned = report.scanned,
                        closed_waiting = report.closed_waiting,
                        closed_idle = report.closed_idle,
                        skipped = report.skipped,
                        "Stale session sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Stale session sweep failed"),
            }
        })
    })?;
    scheduler.add(sweep_job).await?;

    scheduler.start().await?;
    info!(
        cron = %config.sweep_cron,
        waiting_hours = config.stale_waiting_hours,
        active_days = config.stale_active_days,
        "Harbor worker started"
    );

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");

    let mut scheduler = scheduler;
    scheduler.shutdown().await?;
    Ok(())
}
