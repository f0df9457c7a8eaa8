//! Error types for Harbor

use thiserror::Error;

/// Which state-machine or time-window guard refused an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Another supporter claimed the session first
    AlreadyClaimed,
    /// The operation requires an ACTIVE session
    NotActive,
    /// The session is RESOLVED or CLOSED
    AlreadyTerminal,
    EditWindowExpired,
    DeleteWindowExpired,
    /// Tombstoned messages cannot be edited or deleted again
    MessageDeleted,
}

impl ConflictKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyClaimed => "ALREADY_CLAIMED",
            Self::NotActive => "SESSION_NOT_ACTIVE",
            Self::AlreadyTerminal => "SESSION_TERMINAL",
            Self::EditWindowExpired => "EDIT_WINDOW_EXPIRED",
            Self::DeleteWindowExpired => "DELETE_WINDOW_EXPIRED",
            Self::MessageDeleted => "MESSAGE_DELETED",
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::AlreadyClaimed => "session has already been claimed",
            Self::NotActive => "session is not active",
            Self::AlreadyTerminal => "session has already ended",
            Self::EditWindowExpired => "edit window has expired",
            Self::DeleteWindowExpired => "delete window has expired",
            Self::MessageDeleted => "message has been deleted",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Error)]
pub enum SupportError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Conflict: {0}")]
    Conflict(ConflictKind),

    #[error("Not found: {0}")]
    NotFound(&'static str),

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_seconds: u32 },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl SupportError {
    /// Whether the caller may re-fetch current state and try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_) | Self::RateLimited { .. } | Self::Storage(_)
        )
    }
}

impl From<sqlx::Error> for SupportError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => SupportError::NotFound("row"),
            other => SupportError::Storage(other.to_string()),
        }
    }
}

pub type SupportResult<T> = Result<T, SupportError>;
