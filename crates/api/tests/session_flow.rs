//! End-to-end tests for the session HTTP surface
//!
//! Runs the full router over the in-memory store, so no database is needed.
//!
//! ## Running Tests
//! ```bash
//! cargo test -p harbor-api --test session_flow
//! ```

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use harbor_api::{
    auth::JwtManager,
    routes::create_router,
    support::{MemorySessionStore, NoopFilter, SessionPolicy, SessionService, SystemClock},
    websocket::RealtimeChannel,
    AppState, Config, StorageBackend,
};
use harbor_shared::{AgeBracket, RateLimitConfig, RateLimiter, Role};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "integration-test-secret-with-32-plus-chars";

// ============================================================================
// Test Utilities
// ============================================================================

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".to_string(),
        cors_allowed_origins: Vec::new(),
        storage_backend: StorageBackend::Memory,
        database_url: None,
        database_max_connections: 1,
        jwt_secret: SECRET.to_string(),
        message_max_length: 4000,
        edit_window_minutes: 60,
        delete_window_minutes: 1440,
        peer_sessions_minor_safe: true,
        content_filter_url: None,
        content_filter_timeout_ms: 2000,
        rate_limit_sessions_per_minute: 100,
        rate_limit_messages_per_minute: 100,
    }
}

fn test_app() -> Router {
    let service = SessionService::new(
        Arc::new(MemorySessionStore::new()),
        RealtimeChannel::new(),
        Arc::new(NoopFilter),
        Arc::new(SystemClock),
        Arc::new(RateLimiter::new(RateLimitConfig {
            sessions_per_minute: 100,
            messages_per_minute: 100,
        })),
        SessionPolicy::default(),
    );
    create_router(AppState::new(test_config(), service))
}

struct User {
    id: Uuid,
    token: String,
}

fn user(role: Role) -> User {
    let id = Uuid::new_v4();
    let token = JwtManager::new(SECRET)
        .issue(id, role, AgeBracket::Adult, false, time::Duration::hours(1))
        .unwrap();
    User { id, token }
}

async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_session(app: &Router, requester: &User, topic: &str, urgency: &str) -> String {
    let (status, body) = call(
        app,
        "POST",
        "/api/v1/sessions",
        Some(&requester.token),
        Some(json!({ "topic": topic, "urgency": urgency })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["id"].as_str().unwrap().to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_full_conversation_flow() {
    let app = test_app();
    let requester = user(Role::Requester);
    let peer = user(Role::PeerSupporter);

    let session_id = create_session(&app, &requester, "sleep", "low").await;

    let (status, queue) = call(&app, "GET", "/api/v1/sessions/queue", Some(&peer.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue.as_array().unwrap().len(), 1);
    assert_eq!(queue[0]["routing_target"], "peer_supporter");

    let (status, claimed) = call(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/claim", session_id),
        Some(&peer.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claimed["state"], "active");
    assert_eq!(claimed["supporter_id"], peer.id.to_string());

    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/messages", session_id),
        Some(&requester.token),
        Some(json!({ "body": "  hi, I can't sleep  " })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/messages", session_id),
        Some(&peer.token),
        Some(json!({ "body": "I'm here. What's keeping you up?" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, detail) = call(
        &app,
        "GET",
        &format!("/api/v1/sessions/{}", session_id),
        Some(&requester.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = detail["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["body"], "hi, I can't sleep");
    assert_eq!(messages[0]["sender_id"], requester.id.to_string());
    assert_eq!(messages[1]["sender_id"], peer.id.to_string());
    assert_eq!(
        detail["session"]["last_message_preview"],
        "I'm here. What's keeping you up?"
    );

    let (status, queue) = call(&app, "GET", "/api/v1/sessions/queue", Some(&peer.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(queue.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let app = test_app();

    let (status, body) = call(&app, "GET", "/api/v1/sessions", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"]["code"].is_string());

    let (status, _) = call(&app, "GET", "/api/v1/sessions", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_websocket_requires_token() {
    let app = test_app();

    let (status, _) = call(&app, "GET", "/api/v1/ws", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, "GET", "/api/v1/ws?token=not-a-jwt", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A valid token without upgrade headers fails the upgrade, not auth
    let requester = user(Role::Requester);
    let uri = format!("/api/v1/ws?token={}", requester.token);
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let status = app.oneshot(request).await.unwrap().status();
    assert!(status.is_client_error());
    assert_ne!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_second_claim_conflicts() {
    let app = test_app();
    let requester = user(Role::Requester);
    let first = user(Role::Counselor);
    let second = user(Role::Counselor);

    let session_id = create_session(&app, &requester, "grief", "medium").await;
    let uri = format!("/api/v1/sessions/{}/claim", session_id);

    let (status, _) = call(&app, "POST", &uri, Some(&first.token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "POST", &uri, Some(&second.token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "ALREADY_CLAIMED");
}

#[tokio::test]
async fn test_peer_cannot_claim_counselor_session() {
    let app = test_app();
    let requester = user(Role::Requester);
    let peer = user(Role::PeerSupporter);

    let session_id = create_session(&app, &requester, "anxiety", "low").await;

    let (status, queue) = call(&app, "GET", "/api/v1/sessions/queue", Some(&peer.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(queue.as_array().unwrap().is_empty());

    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/claim", session_id),
        Some(&peer.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_outsider_cannot_read_active_session() {
    let app = test_app();
    let requester = user(Role::Requester);
    let counselor = user(Role::Counselor);
    let other_requester = user(Role::Requester);

    let session_id = create_session(&app, &requester, "work", "high").await;
    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/claim", session_id),
        Some(&counselor.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &app,
        "GET",
        &format!("/api/v1/sessions/{}", session_id),
        Some(&other_requester.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_resolved_session_rejects_messages() {
    let app = test_app();
    let requester = user(Role::Requester);
    let counselor = user(Role::Counselor);

    let session_id = create_session(&app, &requester, "stress", "crisis").await;
    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/claim", session_id),
        Some(&counselor.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, resolved) = call(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/resolve", session_id),
        Some(&counselor.token),
        Some(json!({ "notes": "safety plan agreed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["state"], "resolved");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/messages", session_id),
        Some(&requester.token),
        Some(json!({ "body": "one more thing" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "SESSION_TERMINAL");
}

#[tokio::test]
async fn test_health_reports_memory_store() {
    let app = test_app();

    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["realtime_connections"], 0);
}
