//! Support session routes
//!
//! Thin HTTP adapters over `SessionService`. Every handler runs behind
//! `require_auth`, so `AuthUser` is always present.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use harbor_shared::{ContentType, Message, Session};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::ApiResult,
    state::AppState,
    support::{CreateSessionRequest, SessionDetail},
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub body: String,
    #[serde(default)]
    pub content_type: ContentType,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkReadRequest {
    /// Omit to mark every message from the other participant
    #[serde(default)]
    pub message_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub updated: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CloseRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ArchiveRequest {
    pub archived: bool,
}

// =============================================================================
// Session Handlers
// =============================================================================

/// POST /sessions
pub async fn create_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let session = state
        .sessions
        .create_session(&auth_user.actor(), req)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /sessions
pub async fn list_my_sessions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<ListSessionsQuery>,
) -> ApiResult<Json<Vec<Session>>> {
    let sessions = state
        .sessions
        .list_my_sessions(&auth_user.actor(), query.include_archived)
        .await?;
    Ok(Json(sessions))
}

/// GET /sessions/queue
pub async fn list_queue(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Session>>> {
    let queue = state.sessions.list_queue(&auth_user.actor()).await?;
    Ok(Json(queue))
}

/// GET /sessions/:session_id
pub async fn get_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionDetail>> {
    let detail = state
        .sessions
        .get_session(&auth_user.actor(), session_id)
        .await?;
    Ok(Json(detail))
}

/// POST /sessions/:session_id/claim
pub async fn claim_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Session>> {
    let session = state
        .sessions
        .claim_session(&auth_user.actor(), session_id)
        .await?;
    Ok(Json(session))
}

/// POST /sessions/:session_id/resolve
pub async fn resolve_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
    body: Option<Json<ResolveRequest>>,
) -> ApiResult<Json<Session>> {
    let Json(req) = body.unwrap_or_default();
    let session = state
        .sessions
        .resolve_session(&auth_user.actor(), session_id, req.notes)
        .await?;
    Ok(Json(session))
}

/// POST /sessions/:session_id/close
pub async fn close_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
    body: Option<Json<CloseRequest>>,
) -> ApiResult<Json<Session>> {
    let Json(req) = body.unwrap_or_default();
    let session = state
        .sessions
        .close_session(&auth_user.actor(), session_id, req.reason)
        .await?;
    Ok(Json(session))
}

/// PUT /sessions/:session_id/archive
pub async fn archive_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<ArchiveRequest>,
) -> ApiResult<Json<Session>> {
    let session = state
        .sessions
        .archive_session(&auth_user.actor(), session_id, req.archived)
        .await?;
    Ok(Json(session))
}

// =============================================================================
// Message Handlers
// =============================================================================

/// POST /sessions/:session_id/messages
pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let message = state
        .sessions
        .send_message(&auth_user.actor(), session_id, &req.body, req.content_type)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /sessions/:session_id/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
    body: Option<Json<MarkReadRequest>>,
) -> ApiResult<Json<MarkReadResponse>> {
    let Json(req) = body.unwrap_or_default();
    let updated = state
        .sessions
        .mark_read(&auth_user.actor(), session_id, req.message_ids)
        .await?;
    Ok(Json(MarkReadResponse { updated }))
}

/// PATCH /messages/:message_id
pub async fn edit_message(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<EditMessageRequest>,
) -> ApiResult<Json<Message>> {
    let message = state
        .sessions
        .edit_message(&auth_user.actor(), message_id, &req.body)
        .await?;
    Ok(Json(message))
}

/// DELETE /messages/:message_id
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(message_id): Path<Uuid>,
) -> ApiResult<Json<Message>> {
    let message = state
        .sessions
        .delete_message(&auth_user.actor(), message_id)
        .await?;
    Ok(Json(message))
}
