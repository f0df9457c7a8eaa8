//! API routes

pub mod health;
pub mod sessions;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{auth::require_auth, state::AppState, websocket::ws_handler};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();
    let cors = cors_layer(&state.config.cors_allowed_origins);

    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Protected API routes (auth required) - under /api/v1
    let protected_api_routes = Router::new()
        // Sessions
        .route(
            "/sessions",
            get(sessions::list_my_sessions).post(sessions::create_session),
        )
        .route("/sessions/queue", get(sessions::list_queue))
        .route("/sessions/:session_id", get(sessions::get_session))
        .route("/sessions/:session_id/claim", post(sessions::claim_session))
        .route("/sessions/:session_id/resolve", post(sessions::resolve_session))
        .route("/sessions/:session_id/close", post(sessions::close_session))
        .route("/sessions/:session_id/archive", put(sessions::archive_session))
        // Messages
        .route("/sessions/:session_id/messages", post(sessions::send_message))
        .route("/sessions/:session_id/read", post(sessions::mark_read))
        .route(
            "/messages/:message_id",
            patch(sessions::edit_message).delete(sessions::delete_message),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth));

    // WebSocket authenticates via query token, not the middleware
    let api_v1_routes = protected_api_routes.route("/ws", get(ws_handler));

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors),
        )
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
}
