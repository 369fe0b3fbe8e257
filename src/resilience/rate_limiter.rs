//! # Rate Limiter
//!
//! Token bucket guarding a quota-limited API. The bucket holds up to `capacity`
//! tokens and refills continuously at `capacity / window`.
//!
//! Waiting callers queue on a fair `tokio::sync::Mutex`, so they are served in
//! arrival order and a waiter cannot be overtaken indefinitely.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
    /// FIFO admission; held by the caller currently waiting for a token
    queue: tokio::sync::Mutex<()>,
}

impl RateLimiter {
    /// `capacity` tokens available at once, regenerated in full every `window`
    ///
    /// Both values are validated by the config layer; a zero window is treated
    /// as one second.
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        let window_secs = if window.is_zero() {
            1.0
        } else {
            window.as_secs_f64()
        };

        Self {
            capacity,
            refill_per_sec: capacity / window_secs,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            queue: tokio::sync::Mutex::new(()),
        }
    }

    /// Wait until a token is available, then consume it
    pub async fn acquire(&self) {
        let _turn = self.queue.lock().await;

        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec)
                    .max(Duration::from_millis(1))
            };

            debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting for token");
            tokio::time::sleep(wait).await;
        }
    }

    /// Consume a token without waiting; fails if none is available or another
    /// caller is already queued
    pub fn try_acquire(&self) -> bool {
        let Ok(_turn) = self.queue.try_lock() else {
            return false;
        };

        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently in the bucket after refilling
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }
}
