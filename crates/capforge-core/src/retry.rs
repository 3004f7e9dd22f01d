//! Retry utilities for transient remote failures.
//!
//! Rate limits (HTTP 429) wait a fixed pause and re-submit the request; other
//! retryable failures back off exponentially. Attempts are bounded.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::PipelineError;

/// Determine whether a pipeline error is worth retrying.
///
/// Retryable errors: timeouts, rate limits (429), server errors (5xx),
/// connection failures. Non-retryable: auth failures, bad requests.
pub fn is_retryable(error: &PipelineError) -> bool {
    match error {
        PipelineError::Timeout { .. } | PipelineError::Connection { .. } => true,
        PipelineError::Llm {
            status_code: Some(code),
            ..
        } => *code == 429 || (500..=599).contains(code),
        _ => false,
    }
}

/// Map a failed `send()` onto a pipeline error, keeping timeouts and
/// connection failures distinguishable for [`is_retryable`].
pub fn send_error(stage: &str, timeout: Duration, error: reqwest::Error) -> PipelineError {
    if error.is_timeout() {
        PipelineError::Timeout {
            stage: stage.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else if error.is_connect() {
        PipelineError::Connection {
            stage: stage.to_string(),
            message: error.to_string(),
        }
    } else {
        PipelineError::Llm {
            message: format!("{stage} request failed: {error}"),
            status_code: None,
        }
    }
}

/// Whether the error is an HTTP 429 rate-limit response.
pub fn is_rate_limited(error: &PipelineError) -> bool {
    matches!(
        error,
        PipelineError::Llm {
            status_code: Some(429),
            ..
        }
    )
}

/// Calculate exponential backoff duration for a given attempt.
///
/// Uses `base_delay * 2^attempt` with a cap at 30 seconds.
pub fn backoff_duration(attempt: u32, base_delay_ms: u64) -> Duration {
    let delay = base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay.min(30_000))
}

/// Delay before the next attempt after `error`.
pub fn retry_delay(error: &PipelineError, attempt: u32, policy: &RetryConfig) -> Duration {
    if is_rate_limited(error) {
        Duration::from_millis(policy.rate_limit_pause_ms)
    } else {
        backoff_duration(attempt, policy.delay_ms)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget (`policy.attempts` re-submissions) is spent.
///
/// The last error is returned when retries run out.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    label: &str,
    mut op: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.attempts && is_retryable(&e) => {
                let delay = retry_delay(&e, attempt, policy);
                tracing::warn!(
                    "{label} failed (attempt {}/{}), retrying in {:?}: {e}",
                    attempt + 1,
                    policy.attempts + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
