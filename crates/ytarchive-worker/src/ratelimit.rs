//! Client-side token bucket for upstream API calls.
//!
//! The bucket refills lazily: every call first credits `elapsed * rate`
//! tokens (capped at `burst`), so no background ticker is needed. State is
//! process-local; each worker process throttles only itself.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Slack for float error when a sleep lands exactly on the refill instant.
const TOKEN_EPSILON: f64 = 1e-6;

/// A [`RateLimiter::wait`] was cancelled before a token became available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limiter wait cancelled")]
pub struct Cancelled;

#[derive(Debug)]
struct Bucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_update: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_update = now;
    }

    /// Time until one whole token has accrued, `None` if it never will.
    fn delay_for_one(&self) -> Option<Duration> {
        if self.rate <= 0.0 || self.burst < 1.0 {
            return None;
        }
        let secs = (1.0 - self.tokens).max(0.0) / self.rate;
        Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
    }
}

/// Token bucket allowing `rate` operations per second with bursts of up to
/// `burst`. Share it behind an `Arc` between tasks of one process.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<Bucket>,
    /// Signalled when rate or burst change, so sleeping waiters recompute.
    changed: Notify,
}

impl RateLimiter {
    /// Create a limiter that starts with a full bucket.
    pub fn new(rate: f64, burst: u32) -> Self {
        let burst = f64::from(burst);
        Self {
            state: Mutex::new(Bucket {
                rate: rate.max(0.0),
                burst,
                tokens: burst,
                last_update: Instant::now(),
            }),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        // Bucket arithmetic cannot leave the state half-updated, so a
        // poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a token if one is available. Never blocks.
    pub fn allow(&self) -> bool {
        let mut bucket = self.lock();
        bucket.refill(Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Take a token, sleeping until one accrues.
    ///
    /// The lock is released while sleeping and the balance recomputed on
    /// wake, so concurrent waiters do not queue behind one another. A
    /// successful wait zeroes the balance rather than keeping the fraction
    /// accrued past one token. Cancellation consumes nothing.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        loop {
            // Registered before the bucket is read, so a concurrent
            // set_rate/set_burst cannot slip in unnoticed.
            let changed = self.changed.notified();

            let delay = {
                let mut bucket = self.lock();
                bucket.refill(Instant::now());
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                bucket.delay_for_one()
            };

            match delay {
                Some(delay) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Cancelled),
                    _ = changed => continue,
                    _ = tokio::time::sleep(delay) => {}
                },
                // No refill possible until rate or burst change.
                None => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Cancelled),
                    _ = changed => continue,
                },
            }

            let mut bucket = self.lock();
            bucket.refill(Instant::now());
            if bucket.tokens + TOKEN_EPSILON >= 1.0 {
                bucket.tokens = 0.0;
                return Ok(());
            }
            // Another waiter took the token first.
        }
    }

    /// Non-blocking [`wait`](Self::wait): returns `Duration::ZERO` if a token
    /// was taken, otherwise how long the caller would have to wait.
    ///
    /// The balance is zeroed either way, so this is not a way to measure
    /// without consuming.
    pub fn reserve(&self) -> Duration {
        let mut bucket = self.lock();
        bucket.refill(Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Duration::ZERO;
        }
        let delay = bucket.delay_for_one().unwrap_or(Duration::MAX);
        bucket.tokens = 0.0;
        delay
    }

    /// Change the refill rate. Time already elapsed is credited at the old rate.
    pub fn set_rate(&self, rate: f64) {
        {
            let mut bucket = self.lock();
            bucket.refill(Instant::now());
            bucket.rate = rate.max(0.0);
        }
        self.changed.notify_waiters();
    }

    /// Change the bucket size, dropping any tokens above the new ceiling.
    pub fn set_burst(&self, burst: u32) {
        {
            let mut bucket = self.lock();
            bucket.refill(Instant::now());
            bucket.burst = f64::from(burst);
            bucket.tokens = bucket.tokens.min(bucket.burst);
        }
        self.changed.notify_waiters();
    }

    pub fn rate(&self) -> f64 {
        self.lock().rate
    }

    pub fn burst(&self) -> u32 {
        self.lock().burst as u32
    }
}
