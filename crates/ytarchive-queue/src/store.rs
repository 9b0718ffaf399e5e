//! Shared Redis handle with per-call timeouts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};

/// Cloneable store handle shared by [`WorkQueue`](crate::WorkQueue) and
/// [`JobTracker`](crate::JobTracker).
///
/// One multiplexed connection is opened lazily and reused by every clone.
/// It is dropped and re-established after an unrecoverable error.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: Arc<Mutex<Option<MultiplexedConnection>>>,
    op_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Create a store handle. No connection is made until first use.
    pub fn new(redis_url: &str, op_timeout: Duration) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            conn: Arc::new(Mutex::new(None)),
            op_timeout,
        })
    }

    pub fn from_config(config: &QueueConfig) -> QueueResult<Self> {
        Self::new(&config.redis_url, config.op_timeout)
    }

    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    async fn connection(&self) -> QueueResult<MultiplexedConnection> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        debug!("Opened Redis connection");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Run one store operation, bounded by the configured timeout.
    ///
    /// The timeout covers connection setup as well as the command itself.
    pub(crate) async fn run<T, F, Fut>(&self, operation: &'static str, op: F) -> QueueResult<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let attempt = async {
            let conn = self.connection().await?;
            op(conn).await.map_err(QueueError::from)
        };

        let result = match tokio::time::timeout(self.op_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(QueueError::Timeout {
                operation,
                after: self.op_timeout,
            }),
        };

        if let Err(QueueError::Redis(e)) = &result {
            if e.is_unrecoverable_error() || e.is_connection_dropped() {
                warn!(operation, error = %e, "Dropping broken Redis connection");
                self.conn.lock().await.take();
            }
        }

        result
    }

    /// Round-trip a PING, for health checks.
    pub async fn ping(&self) -> QueueResult<()> {
        self.run("PING", |mut conn| async move {
            redis::cmd("PING").query_async::<()>(&mut conn).await
        })
        .await
    }
}
