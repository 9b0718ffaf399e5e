//! Redis-backed work coordination.
//!
//! This crate provides:
//! - Per-channel FIFO work queues with atomic batch claims
//! - Job status records with TTL expiry and active-job index sets
//! - Lazy cleanup of expired and stale index entries on read

pub mod config;
pub mod error;
pub mod keys;
pub mod queue;
pub mod store;
pub mod tracker;

pub use config::{QueueConfig, DEFAULT_NAMESPACE, JOB_STATUS_TTL_SECS, STALE_GRACE_PERIOD_SECS};
pub use error::{QueueError, QueueResult};
pub use keys::KeySpace;
pub use queue::WorkQueue;
pub use store::RedisStore;
pub use tracker::JobTracker;
