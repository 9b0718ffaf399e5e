//! Queue error types.

use std::time::Duration;

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Caller passed an empty identifier or a non-positive batch size.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// A stored record exists but cannot be decoded.
    #[error("Corrupt record at {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl QueueError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Store unreachable or too slow; safe to retry with backoff.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Redis(_) | Self::Timeout { .. })
    }
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> QueueResult<()> {
    if value.is_empty() {
        return Err(QueueError::validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Channel ids are embedded in `job:{channel}:{video}` keys, so they must be
/// non-empty and free of `:`.
pub(crate) fn require_channel_id(value: &str) -> QueueResult<()> {
    require_non_empty("channel", value)?;
    if value.contains(':') {
        return Err(QueueError::validation(format!(
            "channel must not contain ':' (got {:?})",
            value
        )));
    }
    Ok(())
}
