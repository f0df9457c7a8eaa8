//! Harbor API server

use std::time::Duration;

use anyhow::Context;
use tracing::info;

use harbor_api::{build_session_service, routes, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine in deployed environments
    let dotenv_result = dotenvy::dotenv();

    init_tracing();

    if let Err(e) = dotenv_result {
        info!("No .env file loaded: {}", e);
    }

    let config = Config::from_env().context("failed to load configuration")?;
    let bind_address = config.bind_address.clone();

    let sessions = build_session_service(&config).await?;

    // Expired rate limit windows are dropped in the background
    let limiter = sessions.rate_limiter().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            limiter.cleanup().await;
        }
    });

    let state = AppState::new(config, sessions);
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    info!(address = %bind_address, "Harbor API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Harbor API stopped");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,harbor_api=debug,tower_http=info".into());

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down...");
}
