// Retry-with-backoff shared by every write path.
//
// Exponential backoff with jitter, a max delay cap and an optional bound on
// total elapsed time.

use rand::RngExt;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Hard cap on the computed delay.
    pub max_interval: Duration,
    /// Give up once the next retry would start after this much time.
    pub max_elapsed: Option<Duration>,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// When true, adds random jitter of [0, initial_interval/2).
    pub jitter: bool,
}

impl RetryPolicy {
    /// Long-haul profile for segments and the final manifest write.
    pub fn persistent() -> Self {
        Self {
            max_retries: 2,
            initial_interval: Duration::from_secs(30),
            max_interval: Duration::from_secs(4 * 60),
            max_elapsed: Some(Duration::from_secs(15 * 60)),
            multiplier: 1.5,
            jitter: true,
        }
    }

    /// Quick profile for the backup sub-attempt.
    pub fn short() -> Self {
        Self {
            max_retries: 2,
            initial_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(10),
            max_elapsed: Some(Duration::from_secs(30)),
            multiplier: 1.5,
            jitter: true,
        }
    }

    /// A single attempt. Used for intermediate manifest flushes.
    pub fn best_effort() -> Self {
        Self {
            max_retries: 0,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            max_elapsed: None,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1.0)
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        // Float to int casts saturate, so overflow lands on the cap below.
        let exp_ms = (self.initial_interval.as_millis() as f64 * factor).round() as u64;
        let capped = Duration::from_millis(exp_ms).min(self.max_interval);

        if !self.jitter {
            return capped;
        }

        // Jitter is limited so the final delay never exceeds `max_interval`.
        let jitter_range_ms =
            u64::try_from(self.initial_interval.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_interval.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_interval)
    }
}

/// Result of a single attempt, used by the caller to signal retryability.
pub enum RetryAction<T, E> {
    Success(T),
    /// Failed, worth another attempt.
    Retry(E),
    /// Failed, another attempt would fail the same way.
    Fail(E),
}

impl<T, E> RetryAction<T, E> {
    /// Classify a result with the supplied predicate.
    pub fn from_result(result: Result<T, E>, is_retryable: impl FnOnce(&E) -> bool) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) if is_retryable(&err) => Self::Retry(err),
            Err(err) => Self::Fail(err),
        }
    }
}

/// Execute an async operation with retry-and-backoff.
///
/// The `operation` closure receives the current attempt number (0-indexed).
/// The last error is returned once retries or the elapsed budget run out.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T, E>>,
    E: Display,
{
    let started = Instant::now();
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => {
                if attempt >= policy.max_retries {
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                if let Some(max_elapsed) = policy.max_elapsed
                    && started.elapsed() + delay > max_elapsed
                {
                    warn!(
                        attempt = attempt + 1,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %err,
                        "Retry budget exhausted"
                    );
                    return Err(err);
                }
                warn!(
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
