//! Authentication middleware
//!
//! Validates the bearer token and attaches the caller's identity to the request.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use harbor_shared::{AgeBracket, Role};
use std::sync::Arc;
use uuid::Uuid;

use super::jwt::{Claims, JwtManager};
use crate::error::ApiError;
use crate::support::Actor;

/// State needed by the auth middleware
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: Arc<JwtManager>,
}

/// Authenticated caller, inserted as a request extension
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
    pub age_bracket: AgeBracket,
    pub consent: bool,
    pub jti: String,
}

impl AuthUser {
    /// Identity as seen by the access evaluator
    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.user_id,
            role: self.role,
            age_bracket: self.age_bracket,
            has_consent: self.consent,
        }
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            role: claims.role,
            age_bracket: claims.age_bracket,
            consent: claims.consent,
            jti: claims.jti,
        }
    }
}

impl AuthState {
    /// Validate a raw token string
    pub fn authenticate(&self, token: &str) -> Result<AuthUser, ApiError> {
        self.jwt_manager
            .validate_token(token)
            .map(AuthUser::from)
            .map_err(|e| {
                tracing::debug!(error = %e, "Token validation failed");
                ApiError::InvalidToken
            })
    }
}

/// Require a valid `Authorization: Bearer` token
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let auth_user = auth_state.authenticate(token.trim())?;
    request.extensions_mut().insert(auth_user);

    Ok(next.run(request).await)
}
