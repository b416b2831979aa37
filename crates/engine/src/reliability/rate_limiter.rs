//! Outbound call pacing for the activity source
//!
//! Slot reservation rather than post-hoc pacing: every `acquire` reserves the
//! next free slot under the lock, then sleeps outside it. Calls are spaced by
//! at least `60 / qpm` seconds across all callers, however long each call
//! takes.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Process-wide gate for calls to a quota-constrained service.
///
/// # Example
///
/// ```ignore
/// let limiter = RateLimiter::new();
/// limiter.acquire(60).await; // returns immediately
/// limiter.acquire(60).await; // returns ~1s later
/// ```
#[derive(Debug, Default)]
pub struct RateLimiter {
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter with no reserved slots
    pub fn new() -> Self {
        Self::default()
    }

    /// Spacing between calls for a given QPM. Non-positive QPM counts as 1.
    pub fn interval_for(qpm: i64) -> Duration {
        Duration::from_secs_f64(60.0 / qpm.max(1) as f64)
    }

    /// Wait until the caller's slot arrives.
    ///
    /// `qpm` is read by the caller on every call so that a config reload takes
    /// effect on the next reservation. Returns how long the caller waited.
    pub async fn acquire(&self, qpm: i64) -> Duration {
        let interval = Self::interval_for(qpm);

        let wait = {
            let mut next_slot = self.next_slot.lock();
            let now = Instant::now();
            let slot = match *next_slot {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next_slot = Some(slot + interval);
            slot - now
        };

        if !wait.is_zero() {
            trace!(wait_ms = wait.as_millis() as u64, "Waiting for rate limit slot");
            tokio::time::sleep(wait).await;
        }

        wait
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_interval_for() {
        assert_eq!(RateLimiter::interval_for(60), Duration::from_secs(1));
        assert_eq!(RateLimiter::interval_for(120), Duration::from_millis(500));
        assert_eq!(RateLimiter::interval_for(0), Duration::from_secs(60));
        assert_eq!(RateLimiter::interval_for(-3), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_calls_are_spaced() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire(60).await;
        }

        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_does_not_wait() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.acquire(60).await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_holds_across_tasks() {
        let limiter = Arc::new(RateLimiter::new());
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire(60).await;
                Instant::now()
            }));
        }

        let mut finished = Vec::new();
        for handle in handles {
            finished.push(handle.await.unwrap());
        }
        finished.sort();

        assert!(finished[3] - start >= Duration::from_secs(3));
        for pair in finished.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_limiter_does_not_bank_slots() {
        let limiter = RateLimiter::new();
        limiter.acquire(60).await;

        tokio::time::sleep(Duration::from_secs(10)).await;

        // After a long idle period the next call goes straight through,
        // and the one after it is still spaced.
        assert_eq!(limiter.acquire(60).await, Duration::ZERO);
        assert_eq!(limiter.acquire(60).await, Duration::from_secs(1));
    }
}
