//! Content filter collaborator
//!
//! Outgoing message bodies are screened by an external keyword filter. The
//! verdict is persisted with the message; acting on it (escalation) belongs
//! to the moderation service, not to this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Verdict returned by the filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FilterVerdict {
    pub flagged: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Filter returned status {0}")]
    Status(u16),
}

#[async_trait]
pub trait ContentFilter: Send + Sync {
    async fn check(&self, text: &str) -> Result<FilterVerdict, FilterError>;
}

/// Used when no filter endpoint is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFilter;

#[async_trait]
impl ContentFilter for NoopFilter {
    async fn check(&self, _text: &str) -> Result<FilterVerdict, FilterError> {
        Ok(FilterVerdict::default())
    }
}

#[derive(Serialize)]
struct FilterRequest<'a> {
    text: &'a str,
}

/// Filter reached over HTTP: `POST {url}` with `{"text": ...}`
#[derive(Clone)]
pub struct HttpContentFilter {
    client: reqwest::Client,
    url: String,
}

impl HttpContentFilter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FilterError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ContentFilter for HttpContentFilter {
    async fn check(&self, text: &str) -> Result<FilterVerdict, FilterError> {
        let response = self
            .client
            .post(&self.url)
            .json(&FilterRequest { text })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FilterError::Status(response.status().as_u16()));
        }

        Ok(response.json::<FilterVerdict>().await?)
    }
}

/// Run the filter, falling back to an unflagged verdict if it is unavailable.
/// Filter outages never block delivery.
pub async fn screen(filter: &dyn ContentFilter, text: &str) -> FilterVerdict {
    match filter.check(text).await {
        Ok(verdict) => verdict,
        Err(e) => {
            tracing::warn!(error = %e, "Content filter unavailable, persisting message unflagged");
            FilterVerdict::default()
        }
    }
}
