//! Retry manager: exponential backoff with jitter around a single step.
//!
//! Stateless: all logic lives in associated functions that take the policy
//! as a parameter. Transient errors (including timeouts) are retried until
//! `max_attempts` is reached; permanent errors stop immediately. A cancelled
//! token ends the wait between attempts and no further attempt starts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use stepflow_types::workflow::RetryPolicy;
use tokio_util::sync::CancellationToken;

use super::step::StepError;

/// Final result of a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    Succeeded { output: T, attempts: u32 },
    Failed { error: StepError, attempts: u32 },
    /// Cancelled while waiting to retry; `error` is the last failure.
    Cancelled { error: StepError, attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Failed { attempts, .. }
            | RetryOutcome::Cancelled { attempts, .. } => *attempts,
        }
    }
}

pub struct RetryManager;

impl RetryManager {
    /// Delay before the attempt following `attempt` (1-based), without jitter.
    pub fn base_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = policy.base_delay_ms as f64 * policy.multiplier.max(1.0).powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(policy.max_delay_ms as f64)
        } else {
            policy.max_delay_ms as f64
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// `base_delay` perturbed by a random fraction in `[-jitter, +jitter]`.
    pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        let delay_ms = Self::base_delay(policy, attempt).as_millis() as f64;
        let jitter = policy.jitter.clamp(0.0, 1.0);
        if jitter <= 0.0 || delay_ms <= 0.0 {
            return Duration::from_millis(delay_ms as u64);
        }

        let scale: f64 = rand::rng().random_range(-jitter..=jitter);
        let adjusted = (delay_ms + (delay_ms * scale).round()).max(0.0);
        Duration::from_millis(adjusted as u64)
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of
    /// attempts.
    ///
    /// - `operation(attempt)`: one attempt, 1-based
    /// - `on_retry(attempt, &error, delay)`: called before sleeping when a
    ///   failed attempt will be retried
    ///
    /// An attempt in progress is never interrupted by `cancel`.
    pub async fn attempt<T, Op, Fut, OnRetry>(
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        mut operation: Op,
        mut on_retry: OnRetry,
    ) -> RetryOutcome<T>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
        OnRetry: FnMut(u32, &StepError, Duration),
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt: u32 = 1;

        loop {
            let error = match operation(attempt).await {
                Ok(output) => {
                    return RetryOutcome::Succeeded {
                        output,
                        attempts: attempt,
                    };
                }
                Err(error) => error,
            };

            if !error.is_transient() || attempt >= max_attempts {
                return RetryOutcome::Failed {
                    error,
                    attempts: attempt,
                };
            }

            let delay = Self::backoff_delay(policy, attempt);
            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retry scheduled"
            );
            on_retry(attempt, &error, delay);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(attempt, "retry abandoned, cancellation requested");
                    return RetryOutcome::Cancelled {
                        error,
                        attempts: attempt,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 250,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_base_delay_progression_and_cap() {
        let p = policy(10);
        assert_eq!(RetryManager::base_delay(&p, 1), Duration::from_millis(100));
        assert_eq!(RetryManager::base_delay(&p, 2), Duration::from_millis(200));
        assert_eq!(RetryManager::base_delay(&p, 3), Duration::from_millis(250));
        assert_eq!(RetryManager::base_delay(&p, 40), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let p = RetryPolicy {
            max_delay_ms: 10_000,
            jitter: 0.5,
            ..policy(5)
        };
        for _ in 0..100 {
            let ms = RetryManager::backoff_delay(&p, 3).as_millis();
            assert!((200..=600).contains(&ms), "delay {ms} out of range");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_exhaust_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut retries = Vec::new();

        let outcome: RetryOutcome<()> = RetryManager::attempt(
            &policy(4),
            &CancellationToken::new(),
            |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(StepError::transient("connection reset"))
                }
            },
            |attempt, _, delay| retries.push((attempt, delay)),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(outcome, RetryOutcome::Failed { attempts: 4, .. }));
        assert_eq!(
            retries,
            vec![
                (1, Duration::from_millis(100)),
                (2, Duration::from_millis(200)),
                (3, Duration::from_millis(250)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let outcome: RetryOutcome<()> = RetryManager::attempt(
            &policy(5),
            &CancellationToken::new(),
            |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(StepError::permanent("bad request"))
                }
            },
            |_, _, _| panic!("permanent errors are never retried"),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcome,
            RetryOutcome::Failed {
                error: StepError::permanent("bad request"),
                attempts: 1,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_success() {
        let outcome = RetryManager::attempt(
            &policy(2),
            &CancellationToken::new(),
            |attempt| async move {
                if attempt == 1 {
                    Err(StepError::Timeout(Duration::from_secs(5)))
                } else {
                    Ok(attempt)
                }
            },
            |_, _, _| {},
        )
        .await;

        assert_eq!(
            outcome,
            RetryOutcome::Succeeded {
                output: 2,
                attempts: 2,
            }
        );
        assert_eq!(outcome.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            base_delay_ms: 10_000,
            max_delay_ms: 60_000,
            ..policy(5)
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let outcome: RetryOutcome<()> = RetryManager::attempt(
            &policy,
            &cancel,
            |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(StepError::transient("connection reset"))
                }
            },
            |_, _, _| {},
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcome,
            RetryOutcome::Cancelled {
                error: StepError::transient("connection reset"),
                attempts: 1,
            }
        );
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_zero_max_attempts_still_runs_once() {
        let outcome: RetryOutcome<u32> = RetryManager::attempt(
            &RetryPolicy::immediate(0),
            &CancellationToken::new(),
            |attempt| async move { Ok(attempt) },
            |_, _, _| {},
        )
        .await;
        assert_eq!(outcome.attempts(), 1);
    }
}
