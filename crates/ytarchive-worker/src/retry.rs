//! Backoff around store calls made by the claim loop.
//!
//! The queue itself never retries; the worker decides which failures are
//! worth another attempt and gives up early once shutdown is requested.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Exponential backoff policy: `base_delay * 2^retry`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Shown in log lines.
    pub label: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            label: "store call".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn delay_before(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation`, retrying failures that `retryable` accepts.
///
/// Returns the last error once retries run out, the error is not retryable,
/// or `cancel` fires during a backoff sleep. An attempt already in flight is
/// always allowed to finish, since abandoning a claim could drop its batch.
pub async fn retry_async_when<F, Fut, T, E, R>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation: F,
    retryable: R,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut retry = 0u32;

    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if retry >= config.max_retries || !retryable(&error) || cancel.is_cancelled() {
            return Err(error);
        }

        retry += 1;
        let delay = config.delay_before(retry);
        debug!(
            label = %config.label,
            retry,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying after failure"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(label = %config.label, "Backoff interrupted by shutdown");
                return Err(error);
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Counts consecutive failed cycles and goes quiet after `loud_limit` of
/// them, so a store outage logs a handful of warnings instead of one per
/// cycle.
#[derive(Debug, Default)]
pub struct FailureTracker {
    streak: u32,
    loud_limit: u32,
}

impl FailureTracker {
    pub fn new(loud_limit: u32) -> Self {
        Self {
            streak: 0,
            loud_limit,
        }
    }

    pub fn record_success(&mut self) {
        if self.streak > self.loud_limit {
            debug!(failures = self.streak, "Recovered after silenced failures");
        }
        self.streak = 0;
    }

    /// Returns whether this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.streak = self.streak.saturating_add(1);
        if self.streak == self.loud_limit.saturating_add(1) {
            warn!(failures = self.loud_limit, "Silencing repeated failures until recovery");
        }
        self.streak <= self.loud_limit
    }

    pub fn failure_count(&self) -> u32 {
        self.streak
    }
}
