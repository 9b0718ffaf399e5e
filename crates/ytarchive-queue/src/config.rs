//! Store connection and retention settings.

use std::time::Duration;

/// Default key prefix shared by every queue and job key.
pub const DEFAULT_NAMESPACE: &str = "ytarchive:";

/// Job status records expire after 24 hours even if never removed.
pub const JOB_STATUS_TTL_SECS: u64 = 86_400;

/// Terminal records untouched for this long are reaped from the indexes.
pub const STALE_GRACE_PERIOD_SECS: u64 = 300;

/// Per-call bound on any single store round trip.
const DEFAULT_OP_TIMEOUT_MS: u64 = 5_000;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix applied to every key
    pub namespace: String,
    /// Timeout for each store operation, connection setup included
    pub op_timeout: Duration,
    /// TTL applied to job status records on every write
    pub job_ttl: Duration,
    /// Age after which completed/failed records are dropped from the indexes
    pub stale_grace: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            op_timeout: Duration::from_millis(DEFAULT_OP_TIMEOUT_MS),
            job_ttl: Duration::from_secs(JOB_STATUS_TTL_SECS),
            stale_grace: Duration::from_secs(STALE_GRACE_PERIOD_SECS),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            namespace: std::env::var("QUEUE_NAMESPACE")
                .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string()),
            op_timeout: Duration::from_millis(
                std::env::var("QUEUE_OP_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_OP_TIMEOUT_MS),
            ),
            job_ttl: Duration::from_secs(
                std::env::var("JOB_STATUS_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(JOB_STATUS_TTL_SECS),
            ),
            stale_grace: Duration::from_secs(
                std::env::var("JOB_STALE_GRACE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(STALE_GRACE_PERIOD_SECS),
            ),
        }
    }

    /// Same settings under a different key prefix.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}
