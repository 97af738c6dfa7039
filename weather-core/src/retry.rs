//! Single-retry policy for transient provider failures.
//!
//! Retried: timeouts, connection failures, truncated bodies, 5xx, 429, 408.
//! Never retried: other 4xx (bad location, rejected key) and parse failures.

use std::{future::Future, thread, time::Duration};

use crate::provider::ProviderError;

pub const DEFAULT_MAX_RETRIES: u32 = 1;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    NoRetry,
}

pub fn is_retryable_status(status: u16) -> RetryDecision {
    match status {
        500..=599 | 429 | 408 => RetryDecision::Retry,
        _ => RetryDecision::NoRetry,
    }
}

pub fn classify(error: &ProviderError) -> RetryDecision {
    match error {
        ProviderError::Timeout | ProviderError::Connect(_) | ProviderError::Body(_) => {
            RetryDecision::Retry
        }
        ProviderError::Status { status, .. } => is_retryable_status(*status),
    }
}

/// Run `operation`, retrying retryable failures up to `policy.max_retries`
/// times. Returns the last error once retries are exhausted.
pub async fn run_async<T, F, Fut>(policy: RetryPolicy, mut operation: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if should_retry(&policy, attempt, &err) => {
                attempt += 1;
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Blocking twin of [`run_async`].
pub fn run_blocking<T, F>(policy: RetryPolicy, mut operation: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Result<T, ProviderError>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if should_retry(&policy, attempt, &err) => {
                attempt += 1;
                if !policy.delay.is_zero() {
                    thread::sleep(policy.delay);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

fn should_retry(policy: &RetryPolicy, attempt: u32, err: &ProviderError) -> bool {
    if classify(err) == RetryDecision::NoRetry {
        tracing::debug!(error = %err, "Provider error is not retryable");
        return false;
    }
    if attempt >= policy.max_retries {
        tracing::debug!(error = %err, attempts = attempt + 1, "Retries exhausted");
        return false;
    }

    tracing::warn!(
        error = %err,
        attempt = attempt + 1,
        max_attempts = policy.max_retries + 1,
        "Retryable provider error"
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn status(code: u16) -> ProviderError {
        ProviderError::Status { status: code, body: String::new() }
    }

    #[test]
    fn retryable_statuses() {
        for code in [500, 502, 503, 504, 429, 408] {
            assert_eq!(is_retryable_status(code), RetryDecision::Retry, "{code}");
        }
        for code in [200, 400, 401, 403, 404] {
            assert_eq!(is_retryable_status(code), RetryDecision::NoRetry, "{code}");
        }
    }

    #[test]
    fn transport_errors_are_retryable() {
        assert_eq!(classify(&ProviderError::Timeout), RetryDecision::Retry);
        assert_eq!(classify(&ProviderError::Connect("refused".into())), RetryDecision::Retry);
        assert_eq!(classify(&status(401)), RetryDecision::NoRetry);
    }

    #[test]
    fn blocking_retries_once_then_gives_up() {
        let calls = Cell::new(0);
        let result: Result<(), _> = run_blocking(RetryPolicy::new(1, Duration::ZERO), || {
            calls.set(calls.get() + 1);
            Err(ProviderError::Timeout)
        });

        assert!(matches!(result, Err(ProviderError::Timeout)));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn blocking_does_not_retry_client_errors() {
        let calls = Cell::new(0);
        let result: Result<(), _> = run_blocking(RetryPolicy::new(1, Duration::ZERO), || {
            calls.set(calls.get() + 1);
            Err(status(404))
        });

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn async_recovers_on_second_attempt() {
        let calls = Cell::new(0);
        let result = run_async(RetryPolicy::new(1, Duration::ZERO), || {
            calls.set(calls.get() + 1);
            let attempt = calls.get();
            async move {
                if attempt == 1 { Err(status(503)) } else { Ok(attempt) }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn none_policy_never_retries() {
        let calls = Cell::new(0);
        let _: Result<(), _> = run_blocking(RetryPolicy::none(), || {
            calls.set(calls.get() + 1);
            Err(ProviderError::Timeout)
        });
        assert_eq!(calls.get(), 1);
    }
}
