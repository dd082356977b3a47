use tokio::time::{sleep, Duration};
use tracing::warn;

use crate::client::AgentError;

/// Jitter fraction applied to each delay (±10 %).
const JITTER_FRACTION: f64 = 0.10;

/// Bounded exponential backoff applied around external agent calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 400, max_delay_ms: 8_000 }
    }
}

impl RetryPolicy {
    /// A policy that never retries, for paths that must fail fast.
    pub fn none() -> Self {
        Self { max_attempts: 1, base_delay_ms: 0, max_delay_ms: 0 }
    }
}

/// Run `call` until it succeeds, retrying transient failures with
/// exponential backoff and jitter.
///
/// Schedule: base → 2×base → … capped at `max_delay_ms`, up to
/// `max_attempts` tries. Non-transient errors (client errors, rate
/// limits, parse failures) short-circuit immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AgentError>>,
{
    let mut delay_ms = policy.base_delay_ms;

    for attempt in 1..=policy.max_attempts.max(1) {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let total = delay_ms + jitter_ms(delay_ms);
                warn!(
                    %operation,
                    attempt,
                    max = policy.max_attempts,
                    error = %e,
                    retry_after_ms = total,
                    "agent call failed, retrying with backoff"
                );
                sleep(Duration::from_millis(total)).await;
                delay_ms = (delay_ms * 2).min(policy.max_delay_ms);
            }
            Err(e) => return Err(e),
        }
    }

    // Unreachable — the loop always returns inside the match arms above.
    unreachable!("backoff loop exited without returning")
}

/// Return a jitter offset (0 … `JITTER_FRACTION * base_ms`) in milliseconds.
///
/// Uses a deterministic pseudo-random value derived from the current
/// timestamp, avoiding a rand dependency.
fn jitter_ms(base_ms: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_jitter = ((base_ms as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy { max_attempts: 3, base_delay_ms: 1, max_delay_ms: 4 }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_with_backoff(&fast_policy(), "test", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AgentError::Api { status: 503, message: "overloaded".into() })
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), _> = retry_with_backoff(&fast_policy(), "test", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AgentError::Timeout)
            }
        })
        .await;

        assert!(matches!(result, Err(AgentError::Timeout)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_short_circuits() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), _> = retry_with_backoff(&fast_policy(), "test", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AgentError::Parse("garbage".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(AgentError::Parse(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn jitter_stays_within_fraction() {
        for _ in 0..50 {
            assert!(jitter_ms(1_000) <= 100);
        }
        assert_eq!(jitter_ms(0), 0);
    }
}
