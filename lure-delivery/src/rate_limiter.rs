//! Send pacing with a token bucket.
//!
//! - The bucket holds up to `per_minute` tokens and starts full
//! - Tokens refill at `per_minute / 60` per second
//! - Each send consumes one token, waiting for the refill if none is left
//!
//! ```text
//! Rate limit: 120/min
//! - 120 sends go out immediately (burst)
//! - then 2 per second sustained
//! ```

use std::time::{Duration, Instant};

use lure_common::tracing;
use parking_lot::Mutex;

#[derive(Debug)]
struct TokenBucket {
    /// Current number of tokens
    tokens: f64,
    /// Maximum tokens (burst size)
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    last_refill: Instant,
    per_minute: u32,
}

impl TokenBucket {
    fn new(per_minute: u32) -> Self {
        let per_minute = per_minute.max(1);
        let capacity = f64::from(per_minute);
        Self {
            tokens: capacity,
            capacity,
            refill_rate: capacity / 60.0,
            last_refill: Instant::now(),
            per_minute,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = elapsed.mul_add(self.refill_rate, self.tokens).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self) -> Duration {
        self.refill();

        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }

        Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
    }
}

/// Limits outbound sends to a number per minute.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    /// A limiter allowing `per_minute` sends per minute. Zero is treated as
    /// one.
    #[must_use]
    pub fn new(per_minute: u32) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(per_minute)),
        }
    }

    #[must_use]
    pub fn per_minute(&self) -> u32 {
        self.bucket.lock().per_minute
    }

    /// Change the rate. Tokens already in the bucket are kept, capped at the
    /// new capacity.
    pub fn reconfigure(&self, per_minute: u32) {
        let mut bucket = self.bucket.lock();
        if bucket.per_minute == per_minute.max(1) {
            return;
        }

        bucket.refill();
        let tokens = bucket.tokens;
        *bucket = TokenBucket::new(per_minute);
        bucket.tokens = tokens.min(bucket.capacity);

        tracing::debug!(per_minute = bucket.per_minute, "Rate limit changed");
    }

    /// Take a token if one is available, otherwise report how long until one
    /// will be.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock();
        if bucket.try_consume() {
            Ok(())
        } else {
            Err(bucket.time_until_available())
        }
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => {
                    tracing::debug!(wait_ms = wait.as_millis(), "Rate limit reached, waiting");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    #[cfg(test)]
    fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        bucket.refill();
        bucket.tokens
    }
}
