use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::errors::FetchError;

/// Bounded-retry policy composed around one adapter call.
///
/// Retries only failures the taxonomy marks retryable; NotFound and
/// circuit rejections pass through terminally on the first attempt. The
/// policy never lets an error escape as a panic or an unclassified
/// fault: the caller always receives either the success value or the
/// last terminal `FetchError`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Deterministic backoff before attempt `attempt + 1`:
    /// base × 2^(attempt-1), capped. Jitter is added separately at sleep
    /// time so successive deterministic delays are non-decreasing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        let half_base_ms = (self.base_delay.as_millis() / 2) as u64;
        Duration::from_millis(rand::rng().random_range(0..=half_base_ms))
    }

    /// Runs `op` under this policy. `on_failure(attempt, error)` fires
    /// for every failed attempt (terminal ones included) so the caller
    /// can feed the error sink; it does not fire for NotFound, which is
    /// an absence rather than a failure.
    pub async fn run<T, F, Fut, C>(&self, mut op: F, mut on_failure: C) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
        C: FnMut(u32, &FetchError),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if err.is_failure() {
                        on_failure(attempt, &err);
                    }
                    if !err.is_retryable() || attempt >= self.max_attempts {
                        return Err(err);
                    }
                    tokio::time::sleep(self.delay_for(attempt) + self.jitter()).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(10), Duration::from_millis(80))
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let failures = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let failures_in = failures.clone();

        let result: Result<(), _> = policy(3)
            .run(
                || {
                    calls_in.fetch_add(1, Ordering::SeqCst);
                    async { Err(FetchError::Network("down".into())) }
                },
                |_, _| {
                    failures_in.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        assert!(matches!(result, Err(FetchError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(failures.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn not_found_is_terminal_and_unlogged() {
        let calls = Arc::new(AtomicU32::new(0));
        let failures = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let failures_in = failures.clone();

        let result: Result<(), _> = policy(5)
            .run(
                || {
                    calls_in.fetch_add(1, Ordering::SeqCst);
                    async { Err(FetchError::NotFound) }
                },
                |_, _| {
                    failures_in.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        assert_eq!(result, Err(FetchError::NotFound));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result = policy(5)
            .run(
                || {
                    let n = calls_in.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(FetchError::RateLimited("429".into()))
                        } else {
                            Ok(42)
                        }
                    }
                },
                |_, _| {},
            )
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delays_are_non_decreasing_up_to_cap() {
        let policy = RetryPolicy::new(
            6,
            Duration::from_secs(1),
            Duration::from_secs(8),
        );
        let delays: Vec<_> = (1..=6).map(|a| policy.delay_for(a)).collect();
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[2], Duration::from_secs(4));
        assert_eq!(delays[3], Duration::from_secs(8));
        // Capped from here on.
        assert_eq!(delays[5], Duration::from_secs(8));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn circuit_rejection_is_terminal() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result: Result<(), _> = policy(4)
            .run(
                || {
                    calls_in.fetch_add(1, Ordering::SeqCst);
                    async { Err(FetchError::CircuitOpen) }
                },
                |_, _| {},
            )
            .await;

        assert_eq!(result, Err(FetchError::CircuitOpen));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
