//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use harbor_shared::{ConflictKind, SupportError};
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication required")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Resource errors
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(ConflictKind),

    // Rate limiting
    #[error("Too many requests, retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u32 },

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),
}

impl ApiError {
    /// Whether the caller may re-fetch and retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Conflict(_) | ApiError::RateLimited { .. } | ApiError::Storage(_)
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::Forbidden(reason) => (StatusCode::FORBIDDEN, "ACCESS_DENIED", reason.clone()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),

            // Resources
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(kind) => (StatusCode::CONFLICT, kind.code(), kind.to_string()),

            // Rate limiting
            ApiError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", self.to_string()),

            // Storage
            ApiError::Storage(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE", "Storage is temporarily unavailable".to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
                "retryable": self.is_retryable(),
            }
        }));

        let mut response = (status, body).into_response();
        if let ApiError::RateLimited { retry_after_seconds } = self {
            if let Ok(value) = retry_after_seconds.to_string().parse() {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<SupportError> for ApiError {
    fn from(err: SupportError) -> Self {
        match err {
            SupportError::Validation(msg) => ApiError::Validation(msg),
            SupportError::AccessDenied(reason) => {
                tracing::warn!(reason = %reason, "Access denied");
                ApiError::Forbidden(reason)
            }
            SupportError::Conflict(kind) => ApiError::Conflict(kind),
            SupportError::NotFound(what) => ApiError::NotFound(what),
            SupportError::RateLimited { retry_after_seconds } => {
                ApiError::RateLimited { retry_after_seconds }
            }
            SupportError::Storage(msg) => {
                tracing::error!(error = %msg, "Storage error");
                ApiError::Storage(msg)
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        SupportError::from(err).into()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
