//! Token-bucket rate limiting
//!
//! One bucket per provider: refill at `rate_per_minute / 60` tokens per
//! second, burst of one. Waits are deadline-aware so a task timeout aborts
//! the wait instead of queueing forever.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RateLimiter {
    state: Mutex<BucketState>,
    refill_per_sec: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn per_minute(rate_per_minute: u32) -> Self {
        let rate = rate_per_minute.max(1) as f64;
        Self {
            state: Mutex::new(BucketState {
                tokens: 1.0,
                last_refill: Instant::now(),
            }),
            refill_per_sec: rate / 60.0,
        }
    }

    /// Wait for a token, giving up once the wait would cross `deadline`.
    /// Returns false when the deadline cut the wait short.
    pub async fn acquire_until(&self, deadline: Instant) -> bool {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(1.0);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return true;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };

            if Instant::now() + wait > deadline {
                return false;
            }
            tokio::time::sleep(wait).await;
            // Another waiter may have taken the refilled token; re-check.
        }
    }
}
