//! HTTP binding for the session API
//!
//! History fetches are the reconciliation read and are retried on transient
//! failures. Sends are never retried here: a resend could duplicate a message
//! the server already persisted, so failures go back to the reconciler.

use std::time::Duration;

use async_trait::async_trait;
use harbor_shared::{ContentType, Message, Session};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};

/// Retry configuration for history fetches
const RETRY_BASE_DELAY_MS: u64 = 100;
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);
const MAX_RETRIES: usize = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A session together with its ordered history
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionHistory {
    pub session: Session,
    pub messages: Vec<Message>,
}

#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Authoritative session state and full message history
    async fn fetch_history(&self, session_id: Uuid) -> ClientResult<SessionHistory>;

    /// Persist a message; returns the canonical record
    async fn send_message(&self, session_id: Uuid, body: &str) -> ClientResult<Message>;
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    body: &'a str,
    content_type: ContentType,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(default)]
    retryable: bool,
}

/// `SessionApi` over the `/api/v1` HTTP surface with bearer auth
#[derive(Clone)]
pub struct HttpSessionApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
    max_retries: usize,
}

impl HttpSessionApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> ClientResult<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            max_retries: MAX_RETRIES,
        })
    }

    /// Override the number of retries for history fetches
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn fetch_history_once(&self, session_id: Uuid) -> ClientResult<SessionHistory> {
        let response = self
            .client
            .get(self.url(&format!("/sessions/{}", session_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        parse_response(response).await
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn fetch_history(&self, session_id: Uuid) -> ClientResult<SessionHistory> {
        // 2^n * 50ms: 100ms, 200ms, 400ms ... capped
        let retry_strategy = ExponentialBackoff::from_millis(2)
            .factor(RETRY_BASE_DELAY_MS / 2)
            .max_delay(RETRY_MAX_DELAY)
            .take(self.max_retries)
            .map(jitter);

        Retry::spawn(retry_strategy, || async {
            let result = self.fetch_history_once(session_id).await;

            match &result {
                Ok(_) => Ok(result),
                Err(e) if e.is_transient() => {
                    tracing::debug!(session_id = %session_id, error = %e, "Transient error - will retry");
                    Err(result)
                }
                Err(e) => {
                    tracing::debug!(session_id = %session_id, error = %e, "Permanent error - will not retry");
                    Ok(result)
                }
            }
        })
        .await
        .unwrap_or_else(|e| e)
    }

    async fn send_message(&self, session_id: Uuid, body: &str) -> ClientResult<Message> {
        let response = self
            .client
            .post(self.url(&format!("/sessions/{}/messages", session_id)))
            .bearer_auth(&self.token)
            .json(&SendMessageBody {
                body,
                content_type: ContentType::Text,
            })
            .send()
            .await?;
        parse_response(response).await
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> ClientResult<T> {
    let status = response.status();
    let bytes = response.bytes().await?;

    if status.is_success() {
        return serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()));
    }

    match serde_json::from_slice::<ErrorEnvelope>(&bytes) {
        Ok(envelope) => Err(ClientError::Api {
            status: status.as_u16(),
            code: envelope.error.code,
            message: envelope.error.message,
            retryable: envelope.error.retryable,
        }),
        // Proxies and load balancers answer without our envelope
        Err(_) => Err(ClientError::Api {
            status: status.as_u16(),
            code: status
                .canonical_reason()
                .unwrap_or("UNKNOWN")
                .to_uppercase()
                .replace(' ', "_"),
            message: String::from_utf8_lossy(&bytes).into_owned(),
            retryable: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
        }),
    }
}
