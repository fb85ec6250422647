use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 4;

/// Token bucket shared by every remote resolver.
///
/// Holds at most `capacity` tokens and refills `capacity` tokens per
/// second, so bursts never exceed the per-second cap.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    /// Take one token at `now`, or report how long until one is available.
    fn take(&mut self, now: Instant, capacity: f64) -> Option<Duration> {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * capacity).min(capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let missing = 1.0 - self.tokens;
            Some(Duration::from_secs_f64(missing / capacity))
        }
    }
}

impl RateLimiter {
    pub fn per_second(requests: u32) -> Self {
        let capacity = f64::from(requests.max(1));
        Self {
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait until a request may be issued.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                match bucket.take(Instant::now(), self.capacity) {
                    None => return,
                    Some(wait) => wait,
                }
            };
            debug!("Rate limit reached, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::per_second(DEFAULT_REQUESTS_PER_SECOND)
    }
}
