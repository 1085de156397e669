//! Retry and wait-for-finality primitives
//!
//! Two shapes of waiting exist in this crate:
//! - bounded retries of an operation that failed transiently (`retry_with_backoff`)
//! - polling an eventually-visible ledger until a condition holds (`poll_until`)
//!
//! Both back off exponentially with jitter. `poll_until` is bounded by a
//! caller-supplied timeout and is cancelled by dropping its future.

use super::errors::{LedgerError, LedgerResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Retry policy for transient ledger failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,

    /// Base delay in milliseconds
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,

    /// Jitter factor (0.0 - 1.0)
    pub jitter_factor: f64,

    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5000,
            jitter_factor: 0.1,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Calculate delay before the retry following `attempt` (0-indexed).
    /// Returns `None` once the attempt budget is spent.
    pub fn calculate_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts {
            return None;
        }
        Some(backoff(
            self.base_delay_ms,
            self.max_delay_ms,
            self.multiplier,
            self.jitter_factor,
            attempt,
        ))
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Backoff schedule for visibility / confirmation polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollPolicy {
    /// First poll delay in milliseconds
    pub initial_delay_ms: u64,

    /// Upper bound for a single delay in milliseconds
    pub max_delay_ms: u64,

    /// Multiplier applied after every unsuccessful poll
    pub multiplier: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 200,
            max_delay_ms: 2000,
            multiplier: 1.5,
        }
    }
}

impl PollPolicy {
    /// Fixed-interval polling
    pub fn fixed(interval: Duration) -> Self {
        let ms = interval.as_millis() as u64;
        Self {
            initial_delay_ms: ms,
            max_delay_ms: ms,
            multiplier: 1.0,
        }
    }

    pub fn delay_for(&self, poll: u32) -> Duration {
        backoff(
            self.initial_delay_ms,
            self.max_delay_ms,
            self.multiplier,
            0.0,
            poll,
        )
    }
}

fn backoff(base_ms: u64, max_ms: u64, multiplier: f64, jitter_factor: f64, attempt: u32) -> Duration {
    let delay_ms = (base_ms as f64 * multiplier.powi(attempt as i32)).min(max_ms as f64);

    if jitter_factor <= 0.0 {
        return Duration::from_millis(delay_ms as u64);
    }

    let mut rng = rand::thread_rng();
    let jitter_range = delay_ms * jitter_factor;
    let jitter = rng.gen_range(-jitter_range..=jitter_range);
    Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
}

/// Retry an async operation while it fails with a retryable `LedgerError`
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> LedgerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LedgerResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() => match policy.calculate_delay(attempt) {
                Some(delay) => {
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient error, backing off before retry"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %err,
                        "All retry attempts exhausted"
                    );
                    return Err(err);
                }
            },
            Err(err) => {
                debug!(
                    operation = operation_name,
                    error = %err,
                    "Permanent error, not retrying"
                );
                return Err(err);
            }
        }
    }
}

/// Poll `probe` until it yields `Some`, backing off between polls
///
/// Retryable errors count as "not yet"; permanent errors end the wait
/// immediately. With `timeout == None` the wait is unbounded.
pub async fn poll_until<F, Fut, T>(
    operation_name: &str,
    policy: &PollPolicy,
    timeout: Option<Duration>,
    mut probe: F,
) -> LedgerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LedgerResult<Option<T>>>,
{
    let started = Instant::now();
    let mut poll = 0u32;

    loop {
        match probe().await {
            Ok(Some(value)) => {
                debug!(
                    operation = operation_name,
                    polls = poll + 1,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Condition reached"
                );
                return Ok(value);
            }
            Ok(None) => {}
            Err(err) if err.is_retryable() => {
                debug!(operation = operation_name, error = %err, "Poll failed transiently");
            }
            Err(err) => return Err(err),
        }

        let delay = policy.delay_for(poll);
        if let Some(limit) = timeout {
            let elapsed = started.elapsed();
            if elapsed + delay > limit {
                return Err(LedgerError::timeout(operation_name, elapsed));
            }
        }
        sleep(delay).await;
        poll += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_retry_policy_delay() {
        let policy = RetryPolicy::default();

        let delay1 = policy.calculate_delay(0);
        assert!(delay1.is_some());

        let delay2 = policy.calculate_delay(1);
        assert!(delay2.is_some());
        assert!(delay2.unwrap() >= delay1.unwrap());

        assert!(policy.calculate_delay(2).is_none());
        assert!(RetryPolicy::none().calculate_delay(0).is_none());
    }

    #[test]
    fn test_poll_policy_caps_delay() {
        let policy = PollPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for(20), Duration::from_millis(2000));

        let fixed = PollPolicy::fixed(Duration::from_millis(400));
        assert_eq!(fixed.delay_for(0), fixed.delay_for(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_with_backoff("flaky", &RetryPolicy::default(), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(LedgerError::transport("mock", "reset"))
                } else {
                    Ok(7u64)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_permanent_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: LedgerResult<()> = retry_with_backoff("doomed", &RetryPolicy::default(), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(LedgerError::Validation("bad".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let result: LedgerResult<()> = poll_until(
            "never visible",
            &PollPolicy::default(),
            Some(Duration::from_secs(3)),
            || async { Ok(None) },
        )
        .await;

        assert!(matches!(result, Err(LedgerError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_treats_not_ready_as_pending() {
        let table = solana_sdk::pubkey::Pubkey::new_unique();
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();
        let value = poll_until("table", &PollPolicy::default(), None, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(LedgerError::TableNotReady { table })
                } else {
                    Ok(Some(42u8))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }
}
