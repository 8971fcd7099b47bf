// auth-session/src/retry.rs
use common::{AuthError, AuthErrorCode, NotificationOptions, NotificationSink, RetryDefaults};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

const LOG_CATEGORY: &str = "NetworkRetry";

/// Attempt budget, backoff and timeout for one retried call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-attempt deadline; hitting it fails the whole call
    pub timeout: Option<Duration>,
    /// Extra context attached to every log line of the call
    pub metadata: BTreeMap<String, String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetryDefaults::default())
    }
}

impl From<&RetryDefaults> for RetryConfig {
    fn from(defaults: &RetryDefaults) -> Self {
        Self {
            max_attempts: defaults.max_attempts,
            base_delay: Duration::from_millis(defaults.base_delay_ms),
            max_delay: Duration::from_millis(defaults.max_delay_ms),
            timeout: Some(Duration::from_millis(defaults.timeout_ms)),
            metadata: BTreeMap::new(),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            timeout: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Delay after the failed `attempt` (1-based): `base * 2^(attempt-1)`, capped at `max_delay`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let multiplier = 2u32.saturating_pow(exponent);
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }

    fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Terminal outcome of [`retry_with_timeout`]. `attempts` is always in `1..=max_attempts`.
#[derive(Debug)]
pub struct RetryResult<T> {
    pub success: bool,
    pub result: Option<T>,
    pub error: Option<AuthError>,
    pub attempts: u32,
}

impl<T> RetryResult<T> {
    fn succeeded(result: T, attempts: u32) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            attempts,
        }
    }

    fn failed(error: AuthError, attempts: u32) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
            attempts,
        }
    }

    pub fn into_result(self) -> Result<T, AuthError> {
        match (self.result, self.error) {
            (Some(result), _) => Ok(result),
            (None, Some(error)) => Err(error),
            (None, None) => Err(AuthError::new(AuthErrorCode::InternalError, "retry produced no outcome")),
        }
    }
}

/// Race `future` against `timeout`. The slow future is dropped on timeout, so a late
/// completion can never reach the caller.
pub async fn with_timeout<T, F>(future: F, timeout: Duration, operation: &str) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, AuthError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(outcome) => outcome,
        Err(_) => {
            let timeout_ms = timeout.as_millis() as u64;
            tracing::warn!(category = LOG_CATEGORY, operation, timeout_ms, "Operation timed out");
            Err(AuthError::timeout(operation, timeout_ms))
        }
    }
}

/// Run `operation` up to `config.max_attempts` times, reporting the outcome instead of failing.
///
/// A timeout ends the call at once with a failed result; ordinary failures back off and retry.
pub async fn retry_with_timeout<T, F, Fut>(
    mut operation: F,
    config: &RetryConfig,
    context: &str,
    notifier: &dyn NotificationSink,
) -> RetryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AuthError>>,
{
    let max_attempts = config.attempt_budget();
    let toast = NotificationOptions::toast(format!("retry-{}", context));
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match config.timeout {
            Some(timeout) => with_timeout(operation(), timeout, context).await,
            None => operation().await,
        };

        match outcome {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(category = LOG_CATEGORY, context, attempts = attempt, "Operation recovered");
                    notifier.success(
                        &format!("{} succeeded after {} attempts", context, attempt),
                        toast,
                    );
                }
                return RetryResult::succeeded(result, attempt);
            }
            Err(e) if e.is_timeout() => {
                tracing::error!(category = LOG_CATEGORY, context, attempt, metadata = ?config.metadata, error = %e, "Attempt timed out, giving up");
                notifier.error(&format!("{}: {}", context, e.user_message()), toast);
                return RetryResult::failed(e, attempt);
            }
            Err(e) => {
                tracing::warn!(category = LOG_CATEGORY, context, attempt, max_attempts, metadata = ?config.metadata, error = %e, "Attempt failed");

                if attempt >= max_attempts {
                    notifier.error(
                        &format!("{} failed after {} attempts: {}", context, attempt, e.user_message()),
                        toast,
                    );
                    return RetryResult::failed(e, attempt);
                }

                notifier.info(&format!("{}: retrying ({}/{})", context, attempt + 1, max_attempts), toast.clone());
                tokio::time::sleep(config.backoff_delay(attempt)).await;
            }
        }
    }
}

/// Retry `operation` while it fails with one of `retryable_codes`.
///
/// Any other code is returned unchanged after that attempt. Exhausting the budget returns
/// [`AuthError::RetryExhausted`] wrapping the last cause.
pub async fn with_retry<T, F, Fut>(
    mut operation: F,
    config: &RetryConfig,
    retryable_codes: &[AuthErrorCode],
) -> Result<T, AuthError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AuthError>>,
{
    let max_attempts = config.attempt_budget();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        let code = error.code();
        if !retryable_codes.contains(&code) {
            tracing::debug!(category = LOG_CATEGORY, attempt, %code, "Non-retryable error, aborting");
            return Err(error);
        }

        if attempt >= max_attempts {
            tracing::error!(category = LOG_CATEGORY, attempts = attempt, error = %error, "Retries exhausted");
            return Err(AuthError::RetryExhausted {
                attempts: attempt,
                source: Box::new(error),
            });
        }

        let delay = config.backoff_delay(attempt);
        tracing::debug!(category = LOG_CATEGORY, attempt, %code, delay_ms = delay.as_millis() as u64, "Retrying");
        tokio::time::sleep(delay).await;
    }
}
