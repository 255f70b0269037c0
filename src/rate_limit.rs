use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::errors::FetchError;
use crate::models::SourceKind;

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rpm: u32) -> Self {
        let refill_per_sec = f64::from(rpm) / 60.0;
        // One second of burst, at least a single request.
        let capacity = refill_per_sec.max(1.0);
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes a token, or returns how long until one is due.
    fn try_take(&mut self) -> Result<(), Duration> {
        let now = Instant::now();
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else if self.refill_per_sec > 0.0 {
            let need = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(need / self.refill_per_sec))
        } else {
            Err(Duration::from_secs(60))
        }
    }
}

/// Per-source token-bucket throttle.
///
/// `acquire` suspends only the calling task; the bucket lock is held for
/// the arithmetic, never across the wait. The per-source steady-state
/// rate therefore holds across the whole run regardless of how many
/// leads are in flight.
pub struct RateLimiter {
    buckets: HashMap<SourceKind, Mutex<TokenBucket>>,
    acquire_timeout: Duration,
}

impl RateLimiter {
    /// `rates` maps each configured source to its requests/minute budget.
    pub fn new(rates: &[(SourceKind, u32)], acquire_timeout: Duration) -> Self {
        let buckets = rates
            .iter()
            .map(|&(source, rpm)| (source, Mutex::new(TokenBucket::new(rpm))))
            .collect();
        Self {
            buckets,
            acquire_timeout,
        }
    }

    /// Waits for a token for `source`, failing with `RateLimited` when
    /// the deadline elapses first.
    pub async fn acquire(&self, source: SourceKind) -> Result<(), FetchError> {
        let Some(bucket) = self.buckets.get(&source) else {
            return Ok(());
        };
        tokio::time::timeout(self.acquire_timeout, async {
            loop {
                let wait = {
                    let mut bucket = bucket.lock().await;
                    match bucket.try_take() {
                        Ok(()) => return,
                        Err(wait) => wait,
                    }
                };
                tokio::time::sleep(wait).await;
            }
        })
        .await
        .map_err(|_| {
            FetchError::RateLimited(format!(
                "token wait for {} exceeded {:?}",
                source, self.acquire_timeout
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn steady_state_rate_is_never_exceeded() {
        // 60 rpm = one token per second, burst of one.
        let limiter = RateLimiter::new(&[(SourceKind::Fssp, 60)], Duration::from_secs(120));
        let started = Instant::now();
        for _ in 0..5 {
            limiter.acquire(SourceKind::Fssp).await.unwrap();
        }
        // First token is free, the remaining four each cost a second.
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_produces_rate_limited() {
        let limiter = RateLimiter::new(&[(SourceKind::Nalog, 1)], Duration::from_millis(200));
        limiter.acquire(SourceKind::Nalog).await.unwrap();
        // Next token is a minute away, the deadline is 200ms.
        let err = limiter.acquire(SourceKind::Nalog).await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimited(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn buckets_are_isolated_per_source() {
        let limiter = RateLimiter::new(
            &[(SourceKind::Fssp, 1), (SourceKind::Court, 60)],
            Duration::from_millis(100),
        );
        limiter.acquire(SourceKind::Fssp).await.unwrap();
        // Fssp is exhausted for a minute; court must still be instant.
        let started = Instant::now();
        limiter.acquire(SourceKind::Court).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_source_is_unthrottled() {
        let limiter = RateLimiter::new(&[], Duration::from_millis(10));
        limiter.acquire(SourceKind::Rosreestr).await.unwrap();
    }
}
