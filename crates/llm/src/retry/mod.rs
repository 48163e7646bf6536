//! Retry policy for provider calls.
//!
//! The policy itself is pure: [`RetryPolicy::decide`] maps an error and an
//! attempt number to either a delay or a give-up. [`execute_with_retry`]
//! drives an async operation through it, sleeping between attempts and
//! honoring caller cancellation.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{ErrorKind, LlmError, Result};

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Backoff configuration with exponential delay and optional jitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per provider, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Spread delays by ±10%, never past `max_delay_ms`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: true,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = duration_ms(delay);
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = duration_ms(delay);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// `min(base * 2^attempt, max)`; attempt 0 is the delay before the first retry.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let millis = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        let delay = Duration::from_millis(millis);

        if self.jitter && millis > 0 {
            let range = millis as f64 * 0.1;
            let offset = rand::thread_rng().gen_range(-range..=range);
            let jittered = (millis as f64 + offset).clamp(0.0, self.max_delay_ms as f64);
            Duration::from_millis(jittered as u64)
        } else {
            delay
        }
    }

    /// Classify a failure of attempt `attempt` (0-based).
    pub fn decide(&self, error: &LlmError, attempt: u32) -> RetryDecision {
        if attempt.saturating_add(1) >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        match error.kind() {
            ErrorKind::RateLimited => match error.retry_after() {
                Some(wait) => RetryDecision::RetryAfter(wait),
                None => RetryDecision::RetryAfter(self.backoff_delay(attempt)),
            },
            ErrorKind::ProviderUnavailable
            | ErrorKind::ServerError
            | ErrorKind::Timeout
            | ErrorKind::ProviderResponse => RetryDecision::RetryAfter(self.backoff_delay(attempt)),
            ErrorKind::ProviderConfig
            | ErrorKind::RuntimeConfig
            | ErrorKind::ProviderNotFound
            | ErrorKind::ActiveProviderDeletion
            | ErrorKind::ProviderUnhealthy
            | ErrorKind::Client
            | ErrorKind::Cancelled
            | ErrorKind::NoActiveProvider
            | ErrorKind::AllProvidersFailed
            | ErrorKind::Store
            | ErrorKind::Credential => RetryDecision::GiveUp,
        }
    }
}

/// Run `operation` until it succeeds, the policy gives up, or `cancel` fires.
///
/// The closure receives the 0-based attempt number. Attempts never overlap:
/// each one is awaited (or dropped on cancellation) before the next starts.
/// A cancelled attempt is dropped in place, which aborts whatever I/O it had
/// in flight.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    target: &str,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        debug!(provider_id = %target, attempt = attempt + 1, max_attempts = policy.max_attempts, "Starting attempt");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(provider_id = %target, attempt = attempt + 1, "Attempt aborted by caller cancellation");
                return Err(LlmError::Cancelled);
            }
            outcome = operation(attempt) => outcome,
        };

        let error = match outcome {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        provider_id = %target,
                        attempts = attempt + 1,
                        elapsed_ms = duration_ms(started.elapsed()),
                        "Operation succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        let delay = match policy.decide(&error, attempt) {
            RetryDecision::RetryAfter(delay) => delay,
            RetryDecision::GiveUp => {
                error!(
                    provider_id = %target,
                    attempts = attempt + 1,
                    elapsed_ms = duration_ms(started.elapsed()),
                    error = %error,
                    "Operation failed permanently"
                );
                return Err(error);
            }
        };

        warn!(
            provider_id = %target,
            attempt = attempt + 1,
            delay_ms = duration_ms(delay),
            error = %error,
            "Attempt failed, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(provider_id = %target, "Retry wait aborted by caller cancellation");
                return Err(LlmError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ClientErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn unavailable() -> LlmError {
        LlmError::ProviderUnavailable {
            provider: "p1".to_string(),
            reason: "connection refused".to_string(),
        }
    }

    fn exact() -> RetryPolicy {
        RetryPolicy::default().with_jitter(false)
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = exact();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(10), Duration::from_secs(60));
        assert_eq!(policy.backoff_delay(200), Duration::from_secs(60));
    }

    #[test]
    fn test_delays_beyond_u64_millis_saturate() {
        assert_eq!(duration_ms(Duration::from_millis(1_500)), 1_500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);

        let policy = exact().with_max_delay(Duration::MAX);
        assert_eq!(policy.max_delay_ms, u64::MAX);
        assert_eq!(policy.backoff_delay(70), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 0..12 {
            let delay = policy.backoff_delay(attempt);
            let nominal = exact().backoff_delay(attempt).as_millis() as f64;
            let actual = delay.as_millis() as f64;
            assert!(actual >= nominal * 0.9 - 1.0, "attempt {attempt}: {actual}");
            assert!(delay <= policy.max_delay());
        }
    }

    #[test]
    fn test_rate_limit_uses_retry_after() {
        let policy = exact();
        let error = LlmError::RateLimited {
            provider: "qwen".to_string(),
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(
            policy.decide(&error, 0),
            RetryDecision::RetryAfter(Duration::from_secs(5))
        );

        let error = LlmError::RateLimited {
            provider: "qwen".to_string(),
            retry_after: None,
        };
        assert_eq!(
            policy.decide(&error, 1),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_client_errors_are_not_retried() {
        let error = LlmError::ClientError {
            provider: "openai".to_string(),
            kind: ClientErrorKind::Unauthorized,
            status: Some(401),
            message: "bad key".to_string(),
        };
        assert_eq!(exact().decide(&error, 0), RetryDecision::GiveUp);
        assert_eq!(exact().decide(&LlmError::Cancelled, 0), RetryDecision::GiveUp);
    }

    #[test]
    fn test_gives_up_after_last_attempt() {
        let policy = exact();
        assert!(matches!(policy.decide(&unavailable(), 1), RetryDecision::RetryAfter(_)));
        assert_eq!(policy.decide(&unavailable(), 2), RetryDecision::GiveUp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_sleeps_between_attempts_only() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let counter = calls.clone();
        let result: Result<()> = execute_with_retry(&exact(), "p1", &CancellationToken::new(), |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            }
        })
        .await;

        assert!(matches!(result, Err(LlmError::ProviderUnavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s, no wait after the final attempt
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_millis(3_100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_recovers() {
        let result = execute_with_retry(&exact(), "p1", &CancellationToken::new(), |attempt| async move {
            if attempt == 0 {
                Err(unavailable())
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result.ok(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = execute_with_retry(&exact(), "p1", &cancel, |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            }
        })
        .await;

        assert!(matches!(result, Err(LlmError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
