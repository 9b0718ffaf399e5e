//! Shared data models for the ytarchive work-coordination core.
//!
//! This crate provides Serde-serializable types for:
//! - Per-video job status records written by workers
//! - The closed set of job lifecycle states

pub mod job_status;

pub use job_status::{JobState, JobStatusRecord};
