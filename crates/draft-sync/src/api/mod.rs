// Remote fantasy-service boundary: the `DraftApi` trait, its error taxonomy,
// and the bounded retry policy shared by every request.

pub mod extract;
pub mod yahoo;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    /// Timeout, connection failure, 5xx or rate limiting. Retried locally.
    #[error("transient network error: {message}")]
    Transient { message: String },

    /// Expired or invalid credentials. Never retried.
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// A non-retryable, non-auth HTTP status.
    #[error("request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    /// The request could not be built (bad URL, bad header value).
    #[error("invalid request to {url}: {message}")]
    Request { url: String, message: String },

    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl ApiError {
    pub fn transient(message: impl Into<String>) -> Self {
        ApiError::Transient {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        ApiError::Auth {
            message: message.into(),
        }
    }

    /// Whether another attempt may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transient { .. })
    }

    /// Whether progress requires re-authorization.
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth { .. })
    }
}

// ---------------------------------------------------------------------------
// DraftApi
// ---------------------------------------------------------------------------

/// Read access to one league's draft on the remote service.
///
/// Payloads are returned raw; shape normalisation is the job of
/// [`extract`]. Implementations apply retry and pagination internally, so a
/// returned `ApiError::Transient` means the retry budget is already spent.
#[async_trait]
pub trait DraftApi: Send + Sync {
    /// Every draft-result record in source (pick) order.
    async fn fetch_draft_results(&self) -> Result<Vec<Value>, ApiError>;

    /// The raw player node for `player_key`.
    async fn fetch_player(&self, player_key: &str) -> Result<Value, ApiError>;

    /// The raw league node carrying `settings`.
    async fn fetch_league_settings(&self) -> Result<Value, ApiError>;

    /// The raw team records of the league.
    async fn fetch_teams(&self) -> Result<Vec<Value>, ApiError> {
        Ok(Vec::new())
    }

    /// Raw player records with draft analysis, all pages concatenated.
    async fn fetch_draft_analysis(&self) -> Result<Vec<Value>, ApiError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Bounded retry with doubling delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubled after each further one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are exhausted (the last error is returned).
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "{label}: {e}; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
