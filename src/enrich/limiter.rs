//! Global request pacing for one external service.

use core::time::Duration;
use std::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum interval between grants, globally across every task
/// sharing this limiter.
///
/// A monotonic "next allowed" watermark is advanced under a mutex; the sleep
/// itself happens outside the lock so waiters queue up fairly without holding
/// it. A zero interval disables throttling.
#[derive(Debug)]
pub struct ServiceLimiter {
    min_interval: Duration,
    next_allowed: Mutex<Option<Instant>>,
}

impl ServiceLimiter {
    #[must_use]
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_allowed: Mutex::new(None),
        }
    }

    /// Wait until at least the configured interval has elapsed since the last grant.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let wait = {
            let mut guard = self.next_allowed.lock().expect("lock not poisoned");
            let now = Instant::now();
            let (wait, base) = match *guard {
                Some(next) if next > now => (next - now, next),
                _ => (Duration::ZERO, now),
            };
            *guard = Some(base + self.min_interval);
            wait
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
