//! Client error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Structured error body returned by the API
    #[error("API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        retryable: bool,
    },

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    #[error("Unknown pending send: {0}")]
    UnknownPending(uuid::Uuid),
}

impl ClientError {
    /// Returns true if this error is transient and the request may be retried
    pub fn is_transient(&self) -> bool {
        match self {
            // Network failures and timeouts
            ClientError::Http(e) => !e.is_decode() && !e.is_builder(),
            // Conflicts are retryable only after a re-fetch, never blindly
            ClientError::Api {
                status, retryable, ..
            } => *retryable && *status != 409,

            ClientError::InvalidResponse(_) => false,
            ClientError::UnknownPending(_) => false,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicts_are_not_transient() {
        let conflict = ClientError::Api {
            status: 409,
            code: "ALREADY_CLAIMED".to_string(),
            message: "session has already been claimed".to_string(),
            retryable: true,
        };
        assert!(!conflict.is_transient());

        let storage = ClientError::Api {
            status: 503,
            code: "STORAGE_UNAVAILABLE".to_string(),
            message: "try again".to_string(),
            retryable: true,
        };
        assert!(storage.is_transient());
    }

    #[test]
    fn test_invalid_response_is_permanent() {
        assert!(!ClientError::InvalidResponse("truncated".to_string()).is_transient());
    }
}
