//! Per-channel FIFO work queue.
//!
//! Items are pushed to the tail of `queue:{channel}` and claimed from the
//! head. A claim removes its whole batch inside one Lua script, so two
//! workers claiming from the same channel can never receive the same item.

use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use crate::config::QueueConfig;
use crate::error::{require_channel_id, QueueError, QueueResult};
use crate::keys::KeySpace;
use crate::store::RedisStore;

/// Pops the head of KEYS[1] up to and including index ARGV[1].
const CLAIM_SCRIPT: &str = r#"
local items = redis.call('LRANGE', KEYS[1], 0, ARGV[1])
if #items > 0 then
    redis.call('LTRIM', KEYS[1], #items, -1)
end
return items
"#;

const SCAN_BATCH: usize = 200;

/// Last LRANGE index covering `count` items from the head. Counts beyond
/// what a Redis index can hold are clamped.
fn stop_index(count: usize) -> isize {
    count.min(isize::MAX as usize) as isize - 1
}

/// Work queue client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    store: RedisStore,
    keys: KeySpace,
}

impl WorkQueue {
    pub fn new(store: RedisStore, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    /// Create a queue with its own store handle.
    pub fn from_config(config: &QueueConfig) -> QueueResult<Self> {
        Ok(Self::new(
            RedisStore::from_config(config)?,
            KeySpace::new(config.namespace.clone()),
        ))
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Append items to the tail of the channel's queue, in order.
    ///
    /// An empty batch is a no-op.
    pub async fn enqueue<S: AsRef<str>>(&self, channel: &str, items: &[S]) -> QueueResult<()> {
        require_channel_id(channel)?;
        if items.is_empty() {
            return Ok(());
        }

        let key = self.keys.queue_key(channel);
        let items: Vec<&str> = items.iter().map(AsRef::as_ref).collect();
        let count = items.len();

        let len: u64 = self
            .store
            .run("RPUSH", move |mut conn| async move { conn.rpush(&key, items).await })
            .await?;

        info!(channel, count, queue_len = len, "Enqueued items");
        Ok(())
    }

    /// Atomically remove and return up to `max_count` items from the head.
    ///
    /// Returns fewer items (possibly none) when the queue is shorter. Never
    /// waits for new items.
    pub async fn claim(&self, channel: &str, max_count: usize) -> QueueResult<Vec<String>> {
        require_channel_id(channel)?;
        if max_count == 0 {
            return Err(QueueError::validation("claim batch size must be positive"));
        }

        let key = self.keys.queue_key(channel);
        let stop = stop_index(max_count);
        let items: Vec<String> = self
            .store
            .run("claim script", move |mut conn| async move {
                let script = Script::new(CLAIM_SCRIPT);
                script.key(&key).arg(stop).invoke_async(&mut conn).await
            })
            .await?;

        if items.is_empty() {
            debug!(channel, "Queue empty, nothing claimed");
        } else {
            info!(channel, requested = max_count, claimed = items.len(), "Claimed items");
        }
        Ok(items)
    }

    /// Put claimed-but-unprocessed items back at the head, keeping their order.
    pub async fn requeue_front<S: AsRef<str>>(&self, channel: &str, items: &[S]) -> QueueResult<()> {
        require_channel_id(channel)?;
        if items.is_empty() {
            return Ok(());
        }

        let key = self.keys.queue_key(channel);
        // LPUSH inserts one at a time at the head, so push the batch reversed.
        let items: Vec<&str> = items.iter().rev().map(AsRef::as_ref).collect();
        let count = items.len();

        self.store
            .run("LPUSH", move |mut conn| async move {
                conn.lpush::<_, _, ()>(&key, items).await
            })
            .await?;

        info!(channel, count, "Returned items to queue head");
        Ok(())
    }

    /// Number of pending items. Advisory only.
    pub async fn len(&self, channel: &str) -> QueueResult<u64> {
        require_channel_id(channel)?;
        let key = self.keys.queue_key(channel);
        self.store
            .run("LLEN", move |mut conn| async move { conn.llen(&key).await })
            .await
    }

    /// Drop every pending item for the channel.
    pub async fn clear(&self, channel: &str) -> QueueResult<()> {
        require_channel_id(channel)?;
        let key = self.keys.queue_key(channel);
        self.store
            .run("DEL", move |mut conn| async move { conn.del::<_, ()>(&key).await })
            .await?;

        info!(channel, "Cleared queue");
        Ok(())
    }

    /// Read the `count` items nearest the head without removing them.
    pub async fn peek(&self, channel: &str, count: usize) -> QueueResult<Vec<String>> {
        require_channel_id(channel)?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let key = self.keys.queue_key(channel);
        let stop = stop_index(count);
        self.store
            .run("LRANGE", move |mut conn| async move { conn.lrange(&key, 0, stop).await })
            .await
    }

    /// Channels that currently have a queue key, sorted.
    pub async fn list_queue_keys(&self) -> QueueResult<Vec<String>> {
        let pattern = self.keys.queue_pattern();
        let raw: Vec<String> = self
            .store
            .run("SCAN", move |mut conn| async move {
                let mut cursor: u64 = 0;
                let mut found = Vec::new();
                loop {
                    let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await?;
                    found.extend(batch);
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
                redis::RedisResult::Ok(found)
            })
            .await?;

        // SCAN may return a key more than once.
        let mut channels: Vec<String> = raw
            .iter()
            .filter_map(|key| self.keys.channel_from_queue_key(key))
            .map(str::to_string)
            .collect();
        channels.sort();
        channels.dedup();
        Ok(channels)
    }
}
