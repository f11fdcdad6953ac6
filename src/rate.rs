use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify};
use tokio::time::{Duration, Instant, sleep_until};

/// Process-wide cooperative cancellation: an interrupt flips the flag and
/// wakes every suspension point that is parked on `cancelled()`.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::Relaxed);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Relaxed)
    }

    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register with the notifier before re-checking the flag; a
            // cancel landing between the check and the await is otherwise
            // never delivered to this waiter.
            notified.as_mut().enable();
            if self.is_cancelled() {
                break;
            }
            notified.await;
        }
    }
}

/// Token bucket with capacity one: sustained issuance is capped at the
/// configured rate, with at most a single-token burst after idle periods.
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: f64) -> Self {
        let rate = rate_per_sec.max(0.001);
        RateLimiter {
            interval: Duration::from_secs_f64(1.0 / rate),
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Waits for the next issuance slot. Returns false without consuming a
    /// token when the cancel token fires first.
    pub async fn acquire(&self, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }

        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.interval;
            slot
        };

        tokio::select! {
            _ = sleep_until(slot) => true,
            _ = cancel.cancelled() => {
                // Give the reserved slot back so cancellation does not burn
                // a token.
                let mut next = self.next_slot.lock().await;
                *next -= self.interval;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn acquires_track_the_configured_rate() {
        let limiter = RateLimiter::new(10.0);
        let cancel = CancelToken::new();
        let started = Instant::now();

        for _ in 0..21 {
            assert!(limiter.acquire(&cancel).await);
        }

        // First token is immediate, the next 20 are spaced 100ms apart.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2000), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(2200), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn no_window_exceeds_bucket_capacity_plus_one() {
        let limiter = Arc::new(RateLimiter::new(5.0));
        let cancel = CancelToken::new();
        let started = Instant::now();
        let mut grants = Vec::new();

        for _ in 0..11 {
            assert!(limiter.acquire(&cancel).await);
            grants.push(started.elapsed());
        }

        for window_start in 0..grants.len() {
            let end = grants[window_start] + Duration::from_secs(1);
            let in_window = grants[window_start..]
                .iter()
                .filter(|at| **at < end)
                .count();
            assert!(in_window <= 6, "{in_window} grants inside one second");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_unblocks_a_parked_acquire() {
        let limiter = Arc::new(RateLimiter::new(0.1));
        let cancel = CancelToken::new();

        // Consume the immediate token; the next acquire would park for 10s.
        assert!(limiter.acquire(&cancel).await);

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let granted = waiter.await.unwrap();
        assert!(!granted);
    }

    #[tokio::test]
    async fn cancel_wakes_a_parked_cancelled_future() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        // Let the waiter park before the flag flips.
        tokio::task::yield_now().await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancelled() must wake on cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn pre_cancelled_acquire_returns_immediately() {
        let limiter = RateLimiter::new(1.0);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(!limiter.acquire(&cancel).await);
    }
}
