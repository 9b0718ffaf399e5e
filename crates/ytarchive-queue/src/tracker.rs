//! Job status tracking.
//!
//! Each record lives at `job:{channel}:{video}` with a TTL and is indexed in
//! two sets: `active_jobs` (global) and `channel_jobs:{channel}`. Record and
//! index entries are always written together in one MULTI/EXEC.
//!
//! Index sets are allowed to drift: an entry whose record has expired, or
//! whose record is terminal and older than the grace window, is dropped in
//! the background the next time a bulk read walks that set.

use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};

use ytarchive_models::JobStatusRecord;

use crate::config::{QueueConfig, JOB_STATUS_TTL_SECS, STALE_GRACE_PERIOD_SECS};
use crate::error::{require_channel_id, require_non_empty, QueueError, QueueResult};
use crate::keys::KeySpace;
use crate::store::RedisStore;

/// Deletes every record listed in KEYS[1], unlinks each from KEYS[2], then
/// deletes KEYS[1] itself.
const CLEAR_CHANNEL_SCRIPT: &str = r#"
local keys = redis.call('SMEMBERS', KEYS[1])
for _, key in ipairs(keys) do
    redis.call('DEL', key)
    redis.call('SREM', KEYS[2], key)
end
redis.call('DEL', KEYS[1])
return #keys
"#;

/// Job status tracker. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobTracker {
    store: RedisStore,
    keys: KeySpace,
    job_ttl: Duration,
    stale_grace: Duration,
}

impl JobTracker {
    pub fn new(store: RedisStore, keys: KeySpace) -> Self {
        Self {
            store,
            keys,
            job_ttl: Duration::from_secs(JOB_STATUS_TTL_SECS),
            stale_grace: Duration::from_secs(STALE_GRACE_PERIOD_SECS),
        }
    }

    /// Create a tracker with its own store handle.
    pub fn from_config(config: &QueueConfig) -> QueueResult<Self> {
        Ok(Self::new(
            RedisStore::from_config(config)?,
            KeySpace::new(config.namespace.clone()),
        )
        .with_job_ttl(config.job_ttl)
        .with_stale_grace(config.stale_grace))
    }

    pub fn with_job_ttl(mut self, ttl: Duration) -> Self {
        self.job_ttl = ttl;
        self
    }

    pub fn with_stale_grace(mut self, grace: Duration) -> Self {
        self.stale_grace = grace;
        self
    }

    /// Write (or overwrite) a record and index it, atomically.
    ///
    /// Stamps `updated_at` on the caller's record before writing.
    pub async fn update_progress(&self, record: &mut JobStatusRecord) -> QueueResult<()> {
        require_channel_id(&record.channel_id)?;
        require_non_empty("video_id", &record.video_id)?;

        record.updated_at = Utc::now();

        let key = self.keys.job_key(&record.channel_id, &record.video_id);
        let payload = serde_json::to_string(record).map_err(|source| QueueError::Serialization {
            key: key.clone(),
            source,
        })?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set_ex(&key, payload, self.job_ttl.as_secs().max(1))
            .ignore()
            .sadd(self.keys.active_jobs_key(), &key)
            .ignore()
            .sadd(self.keys.channel_jobs_key(&record.channel_id), &key)
            .ignore();

        self.store
            .run("job update", move |mut conn| async move {
                pipe.query_async::<()>(&mut conn).await
            })
            .await?;

        debug!(
            channel = %record.channel_id,
            video = %record.video_id,
            status = %record.status,
            progress = record.progress,
            "Updated job status"
        );
        Ok(())
    }

    /// Point lookup. `Ok(None)` means expired or never written.
    pub async fn get_status(&self, channel: &str, video: &str) -> QueueResult<Option<JobStatusRecord>> {
        require_channel_id(channel)?;
        require_non_empty("video", video)?;

        let key = self.keys.job_key(channel, video);
        let lookup = key.clone();
        let raw: Option<String> = self
            .store
            .run("GET", move |mut conn| async move { conn.get(&lookup).await })
            .await?;

        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|source| QueueError::Serialization { key, source })
        })
        .transpose()
    }

    /// Live jobs indexed under one channel.
    pub async fn get_active_jobs(&self, channel: &str) -> QueueResult<Vec<JobStatusRecord>> {
        require_channel_id(channel)?;
        self.resolve_index(self.keys.channel_jobs_key(channel), Some(channel))
            .await
    }

    /// Live jobs across every channel.
    pub async fn get_all_active_jobs(&self) -> QueueResult<Vec<JobStatusRecord>> {
        self.resolve_index(self.keys.active_jobs_key(), None).await
    }

    /// Delete one record and both of its index entries, atomically.
    pub async fn remove_job(&self, channel: &str, video: &str) -> QueueResult<()> {
        require_channel_id(channel)?;
        require_non_empty("video", video)?;

        let key = self.keys.job_key(channel, video);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(&key)
            .ignore()
            .srem(self.keys.active_jobs_key(), &key)
            .ignore()
            .srem(self.keys.channel_jobs_key(channel), &key)
            .ignore();

        self.store
            .run("job remove", move |mut conn| async move {
                pipe.query_async::<()>(&mut conn).await
            })
            .await?;

        debug!(channel, video, "Removed job");
        Ok(())
    }

    /// Drop every record indexed under the channel, their global index
    /// entries, and the channel index itself. Returns how many were removed.
    pub async fn clear_channel_jobs(&self, channel: &str) -> QueueResult<u64> {
        require_channel_id(channel)?;

        let channel_key = self.keys.channel_jobs_key(channel);
        let active_key = self.keys.active_jobs_key();
        let removed: u64 = self
            .store
            .run("clear jobs script", move |mut conn| async move {
                let script = Script::new(CLEAR_CHANNEL_SCRIPT);
                script
                    .key(&channel_key)
                    .key(&active_key)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        if removed > 0 {
            info!(channel, removed, "Cleared channel jobs");
        }
        Ok(removed)
    }

    /// Index entries for one channel. An upper bound on live jobs, since
    /// entries not yet reaped are counted too.
    pub async fn get_active_job_count(&self, channel: &str) -> QueueResult<u64> {
        require_channel_id(channel)?;
        self.index_size(self.keys.channel_jobs_key(channel)).await
    }

    /// Index entries across every channel; same caveat as
    /// [`get_active_job_count`](Self::get_active_job_count).
    pub async fn get_total_active_job_count(&self) -> QueueResult<u64> {
        self.index_size(self.keys.active_jobs_key()).await
    }

    async fn index_size(&self, index_key: String) -> QueueResult<u64> {
        self.store
            .run("SCARD", move |mut conn| async move { conn.scard(&index_key).await })
            .await
    }

    /// Resolve one index set. `channel` is set when the set read is that
    /// channel's own index.
    async fn resolve_index(
        &self,
        index_key: String,
        channel: Option<&str>,
    ) -> QueueResult<Vec<JobStatusRecord>> {
        let (job_keys, values) = self
            .store
            .run("index read", move |mut conn| async move {
                let job_keys: Vec<String> = conn.smembers(&index_key).await?;
                if job_keys.is_empty() {
                    return redis::RedisResult::Ok((job_keys, Vec::new()));
                }
                let values: Vec<Option<String>> =
                    redis::cmd("MGET").arg(&job_keys).query_async(&mut conn).await?;
                redis::RedisResult::Ok((job_keys, values))
            })
            .await?;

        let grace = chrono::Duration::seconds(self.stale_grace.as_secs() as i64);
        let resolved = partition_index(job_keys, values, Utc::now(), grace);
        let reap = reap_pipeline(&self.keys, &resolved.reap, channel);
        self.spawn_reap(reap, resolved.reap.len());
        Ok(resolved.live)
    }

    /// Run a reap pipeline without holding up the caller. Failures are
    /// dropped; the next read will find the same keys again.
    fn spawn_reap(&self, pipe: Option<redis::Pipeline>, count: usize) {
        let Some(pipe) = pipe else {
            return;
        };

        let store = self.store.clone();
        tokio::spawn(async move {
            let result = store
                .run("index reap", move |mut conn| async move {
                    pipe.query_async::<()>(&mut conn).await
                })
                .await;
            match result {
                Ok(()) => debug!(count, "Reaped stale job index entries"),
                Err(e) => debug!(count, error = %e, "Stale job reap failed"),
            }
        });
    }
}

/// SREMs that unlink `dead` from the global index and from each key's channel
/// index. When the keys came from one channel's index, that index is used
/// as is. `None` when there is nothing to reap.
pub(crate) fn reap_pipeline(
    keys: &KeySpace,
    dead: &[String],
    channel: Option<&str>,
) -> Option<redis::Pipeline> {
    if dead.is_empty() {
        return None;
    }

    let mut pipe = redis::pipe();
    pipe.srem(keys.active_jobs_key(), dead).ignore();
    match channel {
        Some(channel) => {
            pipe.srem(keys.channel_jobs_key(channel), dead).ignore();
        }
        None => {
            for key in dead {
                if let Some(channel) = keys.channel_from_job_key(key) {
                    pipe.srem(keys.channel_jobs_key(channel), key).ignore();
                }
            }
        }
    }
    Some(pipe)
}

/// Outcome of walking an index set.
#[derive(Debug, Default)]
pub(crate) struct ResolvedIndex {
    /// Records to hand back to the caller
    pub live: Vec<JobStatusRecord>,
    /// Index entries to unlink
    pub reap: Vec<String>,
}

/// Split fetched index entries into live records and keys to reap.
///
/// A key is reaped when its record is gone (TTL elapsed), cannot be
/// decoded, or is terminal and untouched for longer than `grace`.
pub(crate) fn partition_index(
    job_keys: Vec<String>,
    values: Vec<Option<String>>,
    now: DateTime<Utc>,
    grace: chrono::Duration,
) -> ResolvedIndex {
    let mut resolved = ResolvedIndex::default();

    for (key, value) in job_keys.into_iter().zip(values) {
        let Some(raw) = value else {
            resolved.reap.push(key);
            continue;
        };

        match serde_json::from_str::<JobStatusRecord>(&raw) {
            Ok(record) if record.is_stale(now, grace) => resolved.reap.push(key),
            Ok(record) => resolved.live.push(record),
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping corrupt job record");
                resolved.reap.push(key);
            }
        }
    }

    resolved
        .live
        .sort_by(|a, b| (&a.channel_id, a.started_at).cmp(&(&b.channel_id, b.started_at)));
    resolved
}
