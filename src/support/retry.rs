//! Retry with exponential backoff.
//!
//! Used where a single transient failure should not be fatal: outbound
//! provider calls, settlement writes during StopTransaction handling.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Run `operation` until it succeeds, the attempts are exhausted, or
/// `should_retry` declares the error permanent.
pub async fn with_backoff<F, Fut, T, E>(
    policy: RetryPolicy,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
    what: &str,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = policy.initial_delay;

    for attempt in 1..=policy.max_attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = what, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt == policy.max_attempts || !should_retry(&err) {
                    warn!(operation = what, attempt, error = %err, "giving up");
                    return Err(err);
                }
                warn!(
                    operation = what,
                    attempt,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * policy.multiplier).min(policy.max_delay.as_secs_f64()),
                );
            }
        }
    }

    unreachable!("loop exits via return")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = with_backoff(
            RetryPolicy {
                initial_delay: Duration::from_millis(1),
                ..Default::default()
            },
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent") }
            },
            |_| false,
            "test",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_backoff(
            RetryPolicy {
                initial_delay: Duration::from_millis(1),
                ..Default::default()
            },
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("blip")
                    } else {
                        Ok(n)
                    }
                }
            },
            |_| true,
            "test",
        )
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
