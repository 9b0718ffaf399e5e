//! Tracing setup and per-item structured logging.

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// Honors `RUST_LOG`; `LOG_FORMAT=json` switches to JSON lines. Output goes
/// to stderr so command output on stdout stays clean.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,redis=warn"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Logger carrying channel, video and worker on every line.
#[derive(Debug, Clone)]
pub struct ItemLogger {
    channel: String,
    video: String,
    worker: String,
}

impl ItemLogger {
    pub fn new(channel: &str, video: &str, worker: &str) -> Self {
        Self {
            channel: channel.to_string(),
            video: video.to_string(),
            worker: worker.to_string(),
        }
    }

    pub fn log_start(&self) {
        info!(
            channel = %self.channel,
            video = %self.video,
            worker = %self.worker,
            "Item started"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            channel = %self.channel,
            video = %self.video,
            worker = %self.worker,
            "Item warning: {}", message
        );
    }

    pub fn log_completion(&self) {
        info!(
            channel = %self.channel,
            video = %self.video,
            worker = %self.worker,
            "Item completed"
        );
    }

    pub fn log_failure(&self, message: &str) {
        error!(
            channel = %self.channel,
            video = %self.video,
            worker = %self.worker,
            "Item failed: {}", message
        );
    }
}
