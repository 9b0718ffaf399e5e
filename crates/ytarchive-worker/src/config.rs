//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity written into every job status record this worker owns
    pub worker_id: String,
    /// Channels this worker claims from, in round-robin order
    pub channels: Vec<String>,
    /// Maximum items taken per claim
    pub batch_size: usize,
    /// Upstream requests per second
    pub rate_per_sec: f64,
    /// Upstream burst allowance
    pub burst: u32,
    /// Pause after a cycle in which every channel was empty
    pub idle_poll_interval: Duration,
    /// Backoff attempts for a claim that hits a transport error
    pub max_claim_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            channels: Vec::new(),
            batch_size: 5,
            rate_per_sec: 1.0,
            burst: 3,
            idle_poll_interval: Duration::from_secs(2),
            max_claim_retries: 5,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            worker_id: std::env::var("WORKER_ID").unwrap_or_else(|_| default_worker_id()),
            channels: std::env::var("WORKER_CHANNELS")
                .map(|s| parse_channels(&s))
                .unwrap_or_default(),
            batch_size: std::env::var("WORKER_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(5),
            rate_per_sec: std::env::var("WORKER_RATE_PER_SEC")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1.0),
            burst: std::env::var("WORKER_BURST")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            idle_poll_interval: Duration::from_millis(
                std::env::var("WORKER_IDLE_POLL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            ),
            max_claim_retries: std::env::var("WORKER_MAX_CLAIM_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        }
    }
}

fn default_worker_id() -> String {
    format!("worker-{}", uuid::Uuid::new_v4())
}

/// Split a comma-separated channel list, dropping blanks.
fn parse_channels(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_channels() {
        assert_eq!(parse_channels("UCa, UCb,,UCc "), vec!["UCa", "UCb", "UCc"]);
        assert!(parse_channels(" , ").is_empty());
    }

    #[test]
    fn test_default_worker_id_is_unique() {
        let a = WorkerConfig::default();
        let b = WorkerConfig::default();
        assert!(a.worker_id.starts_with("worker-"));
        assert_ne!(a.worker_id, b.worker_id);
    }
}
