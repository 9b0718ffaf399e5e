//! Worker-side pieces of the archiving pipeline.
//!
//! This crate provides:
//! - A process-local token bucket for upstream API quota
//! - The claim loop that drains channel queues into an item processor
//! - Backoff helpers and tracing setup shared by the binaries

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod ratelimit;
pub mod retry;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{ClaimLoop, ItemOutcome, ItemProcessor, ProgressReporter};
pub use logging::ItemLogger;
pub use ratelimit::{Cancelled, RateLimiter};
pub use retry::{retry_async_when, FailureTracker, RetryConfig};
