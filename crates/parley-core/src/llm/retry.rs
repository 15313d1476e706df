//! Bounded retry with constant backoff for completion calls.
//!
//! Transient failures (upstream 5xx, transport errors) are retried until the
//! attempt budget is spent; anything else aborts immediately. Classification
//! lives on [`LlmError::is_retryable`].

use std::future::Future;
use std::time::Duration;

use parley_types::config::RetryConfig;
use parley_types::llm::LlmError;
use tracing::{debug, warn};

/// Retry budget for one logical completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Constant pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: config.backoff(),
        }
    }
}

impl RetryPolicy {
    /// Run `operation` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// `operation` receives the 1-based attempt number. On exhaustion the last
    /// error is returned.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, LlmError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    debug!(attempt, error = %e, "permanent completion error, not retrying");
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    warn!(attempt, error = %e, "completion retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "transient completion error, retrying");
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
