//! Claim loop driving a worker process.
//!
//! The loop walks its channels round-robin, claims a batch from each, and
//! runs every claimed video through an [`ItemProcessor`]. Before each video
//! it takes a token from the shared [`RateLimiter`]; the processor can take
//! more through [`ProgressReporter::throttle`] for follow-up requests.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ytarchive_models::JobStatusRecord;
use ytarchive_queue::{JobTracker, QueueError, QueueResult, WorkQueue};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::ItemLogger;
use crate::ratelimit::{Cancelled, RateLimiter};
use crate::retry::{retry_async_when, FailureTracker, RetryConfig};

/// Does the actual work for one claimed video.
///
/// Returning `Err` marks the video failed, unless shutdown was requested
/// meanwhile, in which case the video goes back to the head of its queue.
pub trait ItemProcessor: Send + Sync + 'static {
    fn process(
        &self,
        item: &mut ProgressReporter,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Handle given to an [`ItemProcessor`] for one video.
pub struct ProgressReporter {
    record: JobStatusRecord,
    tracker: JobTracker,
    limiter: Arc<RateLimiter>,
    shutdown: CancellationToken,
}

impl ProgressReporter {
    pub fn channel(&self) -> &str {
        &self.record.channel_id
    }

    pub fn video(&self) -> &str {
        &self.record.video_id
    }

    pub fn record(&self) -> &JobStatusRecord {
        &self.record
    }

    /// Take an upstream token before an additional request.
    pub async fn throttle(&self) -> Result<(), Cancelled> {
        self.limiter.wait(&self.shutdown).await
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Publish byte counts; progress is derived from them.
    pub async fn bytes(&mut self, done: u64, total: u64) -> QueueResult<()> {
        self.record.set_bytes(done, total);
        self.tracker.update_progress(&mut self.record).await
    }

    /// Publish a fractional progress value.
    pub async fn progress(&mut self, progress: f64) -> QueueResult<()> {
        self.record.set_progress(progress);
        self.tracker.update_progress(&mut self.record).await
    }

    /// Download finished; move to `processing`.
    pub async fn processing(&mut self) -> QueueResult<()> {
        self.record.start_processing();
        self.tracker.update_progress(&mut self.record).await
    }
}

/// What happened to one claimed video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Completed,
    Failed,
    /// Interrupted by shutdown and returned to the queue
    Requeued,
}

/// Worker main loop. See the module docs.
pub struct ClaimLoop<P> {
    config: WorkerConfig,
    queue: WorkQueue,
    tracker: JobTracker,
    limiter: Arc<RateLimiter>,
    processor: P,
    shutdown: CancellationToken,
}

impl<P: ItemProcessor> ClaimLoop<P> {
    pub fn new(config: WorkerConfig, queue: WorkQueue, tracker: JobTracker, processor: P) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_per_sec, config.burst));
        Self {
            config,
            queue,
            tracker,
            limiter,
            processor,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the loop once cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Limiter shared with processors, e.g. to retune it at runtime.
    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run until shutdown. Store failures are logged and retried, never fatal.
    pub async fn run(&self) -> WorkerResult<()> {
        if self.config.channels.is_empty() {
            return Err(WorkerError::config_error("no channels configured"));
        }

        info!(
            worker = %self.config.worker_id,
            channels = self.config.channels.len(),
            batch_size = self.config.batch_size,
            "Starting claim loop"
        );

        let mut failures = FailureTracker::new(3);

        while !self.shutdown.is_cancelled() {
            let mut claimed_any = false;

            for channel in &self.config.channels {
                if self.shutdown.is_cancelled() {
                    break;
                }
                match self.claim(channel).await {
                    Ok(batch) => {
                        failures.record_success();
                        if !batch.is_empty() {
                            claimed_any = true;
                            self.process_batch(channel, batch).await;
                        }
                    }
                    Err(e) => {
                        if failures.record_failure() {
                            warn!(channel = %channel, error = %e, "Claim cycle failed");
                        }
                    }
                }
            }

            if !claimed_any {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.idle_poll_interval) => {}
                }
            }
        }

        info!(worker = %self.config.worker_id, "Claim loop stopped");
        Ok(())
    }

    async fn claim(&self, channel: &str) -> QueueResult<Vec<String>> {
        let retry = RetryConfig::new(format!("claim {}", channel))
            .with_max_retries(self.config.max_claim_retries);
        retry_async_when(
            &retry,
            &self.shutdown,
            || self.queue.claim(channel, self.config.batch_size),
            QueueError::is_transport,
        )
        .await
    }

    /// Process a claimed batch in order. On shutdown, whatever has not
    /// started yet goes back to the head of the queue.
    pub async fn process_batch(&self, channel: &str, batch: Vec<String>) -> Vec<ItemOutcome> {
        let mut outcomes = Vec::with_capacity(batch.len());
        let mut pending = batch.into_iter();

        while let Some(video) = pending.next() {
            let throttled = if self.shutdown.is_cancelled() {
                Err(Cancelled)
            } else {
                self.limiter.wait(&self.shutdown).await
            };

            if throttled.is_err() {
                let unstarted: Vec<String> = std::iter::once(video).chain(pending).collect();
                self.return_to_queue(channel, &unstarted).await;
                outcomes.extend(unstarted.iter().map(|_| ItemOutcome::Requeued));
                break;
            }

            outcomes.push(self.process_item(channel, &video).await);
        }

        outcomes
    }

    async fn process_item(&self, channel: &str, video: &str) -> ItemOutcome {
        let logger = ItemLogger::new(channel, video, &self.config.worker_id);
        logger.log_start();

        let mut record = JobStatusRecord::new(channel, video, self.config.worker_id.as_str());
        record.start_downloading();
        if let Err(e) = self.tracker.update_progress(&mut record).await {
            logger.log_warning(&format!("initial status write failed: {}", e));
        }

        let mut reporter = ProgressReporter {
            record,
            tracker: self.tracker.clone(),
            limiter: Arc::clone(&self.limiter),
            shutdown: self.shutdown.clone(),
        };
        let result = self.processor.process(&mut reporter).await;
        let mut record = reporter.record;

        let outcome = match result {
            Ok(()) => {
                record.complete();
                logger.log_completion();
                ItemOutcome::Completed
            }
            Err(_) if self.shutdown.is_cancelled() => {
                debug!(channel, video, "Item interrupted by shutdown");
                self.return_to_queue(channel, &[video]).await;
                if let Err(e) = self.tracker.remove_job(channel, video).await {
                    logger.log_warning(&format!("status cleanup failed: {}", e));
                }
                return ItemOutcome::Requeued;
            }
            Err(e) => {
                let message = format!("{:#}", e);
                logger.log_failure(&message);
                record.fail(message);
                ItemOutcome::Failed
            }
        };

        if let Err(e) = self.tracker.update_progress(&mut record).await {
            logger.log_warning(&format!("final status write failed: {}", e));
        }
        outcome
    }

    async fn return_to_queue<S: AsRef<str>>(&self, channel: &str, items: &[S]) {
        match self.queue.requeue_front(channel, items).await {
            Ok(()) => info!(channel, count = items.len(), "Returned unstarted items"),
            Err(e) => {
                let lost: Vec<&str> = items.iter().map(AsRef::as_ref).collect();
                error!(channel, error = %e, items = ?lost, "Failed to return items to queue");
            }
        }
    }
}
