//! Job status records for per-video progress tracking.
//!
//! A record is written by the worker that owns a claimed video on every
//! progress tick, and read back by monitoring surfaces. Records carry no
//! history: each write replaces the previous one for the same
//! (channel, video) pair.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a claimed video.
///
/// `Pending -> Downloading -> Processing -> Completed`, or
/// `Downloading | Processing -> Failed`. Transitions are driven by the
/// caller; nothing here enforces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Claimed but no work started yet
    #[default]
    Pending,
    /// Media is being fetched from upstream
    Downloading,
    /// Download finished, post-processing/upload in progress
    Processing,
    /// Finished successfully
    Completed,
    /// Gave up with an error
    Failed,
}

impl JobState {
    /// Get string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Downloading => "downloading",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status snapshot of one claimed video.
///
/// `channel_id` and `video_id` together identify the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusRecord {
    /// Channel the video belongs to
    pub channel_id: String,
    /// Upstream video identifier
    pub video_id: String,
    /// Worker that currently owns (or last owned) the video
    pub worker_id: String,
    /// Fractional completion in `0.0..=1.0`
    pub progress: f64,
    /// Total bytes expected, 0 when unknown
    pub bytes_total: u64,
    /// Bytes received so far
    pub bytes_done: u64,
    /// Current lifecycle state
    pub status: JobState,
    /// Failure reason, only present on failed records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the worker started on this video
    pub started_at: DateTime<Utc>,
    /// When the record was last written
    pub updated_at: DateTime<Utc>,
}

impl JobStatusRecord {
    /// Create a new pending record owned by `worker_id`.
    pub fn new(
        channel_id: impl Into<String>,
        video_id: impl Into<String>,
        worker_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            channel_id: channel_id.into(),
            video_id: video_id.into(),
            worker_id: worker_id.into(),
            progress: 0.0,
            bytes_total: 0,
            bytes_done: 0,
            status: JobState::Pending,
            error: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Check if the record is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `downloading`.
    pub fn start_downloading(&mut self) {
        self.status = JobState::Downloading;
        self.updated_at = Utc::now();
    }

    /// Record byte counts and derive `progress` from them.
    ///
    /// With an unknown total (0) progress is left untouched.
    pub fn set_bytes(&mut self, bytes_done: u64, bytes_total: u64) {
        self.bytes_done = bytes_done;
        self.bytes_total = bytes_total;
        if bytes_total > 0 {
            self.progress = (bytes_done as f64 / bytes_total as f64).clamp(0.0, 1.0);
        }
        self.updated_at = Utc::now();
    }

    /// Set fractional progress directly, clamped to `0.0..=1.0`.
    pub fn set_progress(&mut self, progress: f64) {
        self.progress = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        self.updated_at = Utc::now();
    }

    /// Move to `processing`.
    pub fn start_processing(&mut self) {
        self.status = JobState::Processing;
        self.updated_at = Utc::now();
    }

    /// Mark the video as done.
    pub fn complete(&mut self) {
        self.status = JobState::Completed;
        self.progress = 1.0;
        if self.bytes_total > 0 {
            self.bytes_done = self.bytes_total;
        }
        self.error = None;
        self.updated_at = Utc::now();
    }

    /// Mark the video as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = JobState::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// A terminal record untouched for longer than `grace` is garbage.
    ///
    /// Non-terminal records are never stale here; they age out through
    /// the store TTL instead.
    pub fn is_stale(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.is_terminal() && now - self.updated_at > grace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_pending() {
        let record = JobStatusRecord::new("c1", "v1", "worker-1");
        assert_eq!(record.status, JobState::Pending);
        assert_eq!(record.progress, 0.0);
        assert!(!record.is_terminal());
        assert!(record.error.is_none());
    }

    #[test]
    fn test_record_transitions() {
        let mut record = JobStatusRecord::new("c1", "v1", "worker-1");

        record.start_downloading();
        assert_eq!(record.status, JobState::Downloading);

        record.set_bytes(250, 1000);
        assert_eq!(record.progress, 0.25);

        record.start_processing();
        assert_eq!(record.status, JobState::Processing);
        assert!(!record.is_terminal());

        record.complete();
        assert_eq!(record.status, JobState::Completed);
        assert_eq!(record.progress, 1.0);
        assert_eq!(record.bytes_done, 1000);
        assert!(record.is_terminal());
    }

    #[test]
    fn test_fail_keeps_progress() {
        let mut record = JobStatusRecord::new("c1", "v1", "worker-1");
        record.start_downloading();
        record.set_progress(0.4);
        record.fail("upstream returned 403");

        assert_eq!(record.status, JobState::Failed);
        assert_eq!(record.progress, 0.4);
        assert_eq!(record.error.as_deref(), Some("upstream returned 403"));
    }

    #[test]
    fn test_progress_clamped() {
        let mut record = JobStatusRecord::new("c1", "v1", "worker-1");
        record.set_progress(1.7);
        assert_eq!(record.progress, 1.0);
        record.set_progress(-0.2);
        assert_eq!(record.progress, 0.0);
        record.set_bytes(10, 0);
        assert_eq!(record.progress, 0.0);
    }

    #[test]
    fn test_stale_detection() {
        let grace = Duration::minutes(5);
        let mut record = JobStatusRecord::new("c1", "v1", "worker-1");
        record.start_downloading();

        // In-flight records never go stale, however old
        record.updated_at = Utc::now() - Duration::hours(2);
        assert!(!record.is_stale(Utc::now(), grace));

        record.complete();
        assert!(!record.is_stale(Utc::now(), grace));

        record.updated_at = Utc::now() - Duration::minutes(6);
        assert!(record.is_stale(Utc::now(), grace));
    }

    #[test]
    fn test_state_wire_format() {
        assert_eq!(serde_json::to_string(&JobState::Downloading).unwrap(), "\"downloading\"");
        assert_eq!(JobState::Failed.to_string(), "failed");
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let json = r#"{
            "channel_id": "c1",
            "video_id": "v1",
            "worker_id": "w",
            "progress": 0.5,
            "bytes_total": 100,
            "bytes_done": 50,
            "status": "downloading",
            "started_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:10Z",
            "title": "added by a newer worker"
        }"#;
        let record: JobStatusRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, JobState::Downloading);
        assert_eq!(record.progress, 0.5);
        assert!(record.error.is_none());
    }
}
