//! Retry executor: bounded retries with exponential backoff for one backend.
//!
//! Every attempt runs under the per-call timeout. A failure is classified
//! into an [`Attempt`]: retryable failures (connection, timeout, 5xx, rate
//! limit) sleep and try again; fatal failures (auth, bad request, unusable
//! response, unsupported operation) return immediately without sleeping.
//!
//! With the defaults (500 ms initial delay, base 2.0, 3 retries) the waits
//! are 500 ms → 1 s → 2 s. A rate-limit response carrying a retry-after hint
//! replaces the computed delay, capped by `max_delay`.

use crate::error::BackendError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry settings shared by every backend call in a conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub exponential_base: f64,
    pub max_delay: Duration,
    pub per_call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            exponential_base: 2.0,
            max_delay: Duration::from_secs(30),
            per_call_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// `min(initial_delay * exponential_base^retry, max_delay)`, where
    /// `retry` is 0 for the wait after the first failed attempt.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = self.exponential_base.powi(retry.min(i32::MAX as u32) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Delay before the next attempt: the server hint when present, else backoff.
    pub fn delay_for(&self, retry: u32, error: &BackendError) -> Duration {
        match error.retry_after() {
            Some(hint) => hint.min(self.max_delay),
            None => self.backoff_delay(retry),
        }
    }
}

/// Outcome of a single backend call, tagged for the retry decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    Ok(T),
    Retryable(BackendError),
    Fatal(BackendError),
}

impl<T> From<Result<T, BackendError>> for Attempt<T> {
    fn from(result: Result<T, BackendError>) -> Self {
        match result {
            Ok(v) => Attempt::Ok(v),
            Err(e) if e.is_retryable() => Attempt::Retryable(e),
            Err(e) => Attempt::Fatal(e),
        }
    }
}

/// Final result of [`execute`] plus the number of attempts made.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, BackendError>,
    pub attempts: u32,
}

/// Run `call` until it succeeds, fails fatally, or retries run out.
///
/// `label` identifies the backend and unit in log lines. Cancellation
/// interrupts both a pending call and a backoff sleep and yields
/// [`BackendError::Cancelled`].
pub async fn execute<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    cancel: &CancellationToken,
    mut call: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let max_attempts = policy.max_retries.saturating_add(1);
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return RetryOutcome {
                result: Err(BackendError::Cancelled),
                attempts,
            };
        }
        attempts += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            timed = tokio::time::timeout(policy.per_call_timeout, call()) => {
                timed.unwrap_or_else(|_| Err(BackendError::Timeout {
                    secs: policy.per_call_timeout.as_secs(),
                }))
            }
        };

        let error = match Attempt::from(result) {
            Attempt::Ok(value) => {
                if attempts > 1 {
                    debug!("{}: succeeded on attempt {}", label, attempts);
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Attempt::Fatal(e) => {
                debug!("{}: non-retryable failure — {}", label, e);
                return RetryOutcome {
                    result: Err(e),
                    attempts,
                };
            }
            Attempt::Retryable(e) => e,
        };

        if attempts >= max_attempts {
            warn!(
                "{}: giving up after {} attempt(s) — {}",
                label, attempts, error
            );
            return RetryOutcome {
                result: Err(error),
                attempts,
            };
        }

        let delay = policy.delay_for(attempts - 1, &error);
        warn!(
            "{}: attempt {}/{} failed — {}; retrying in {}ms",
            label,
            attempts,
            max_attempts,
            error,
            delay.as_millis()
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return RetryOutcome {
                    result: Err(BackendError::Cancelled),
                    attempts,
                };
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
