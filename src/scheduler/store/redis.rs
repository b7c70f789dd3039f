//! Redis-backed queue store.
//!
//! The queue uses two Redis lists:
//!
//! - `{queue_name}:pending`: jobs waiting to be reserved
//! - `{queue_name}:processing`: jobs reserved by a worker (for crash recovery)
//!
//! Jobs are pushed on the left (LPUSH) and reserved from the right with
//! BRPOPLPUSH, which atomically moves them onto the left of the processing
//! list. The right end of `processing` therefore always holds the oldest
//! reservation.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use tokio::sync::Mutex;

use super::QueueStore;
use crate::scheduler::config::QueueConfig;
use crate::scheduler::queue::QueueError;

/// Redis implementation of [`QueueStore`].
pub struct RedisStore {
    /// Client used to open dedicated connections for blocking commands.
    client: redis::Client,
    /// Shared connection for non-blocking commands (handles reconnection).
    redis: ConnectionManager,
    /// Idle connections reserved for BRPOPLPUSH.
    ///
    /// A blocking command stalls every request pipelined behind it on a
    /// multiplexed connection, so each concurrent reserve gets its own.
    blocking: Mutex<Vec<MultiplexedConnection>>,
    pending_key: String,
    processing_key: String,
}

impl RedisStore {
    /// Connects to Redis using the given queue configuration.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(config: &QueueConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            redis,
            blocking: Mutex::new(Vec::new()),
            pending_key: config.pending_key(),
            processing_key: config.processing_key(),
        })
    }

    /// Returns the key of the pending list.
    pub fn pending_key(&self) -> &str {
        &self.pending_key
    }

    /// Returns the key of the processing list.
    pub fn processing_key(&self) -> &str {
        &self.processing_key
    }

    async fn checkout_blocking(&self) -> Result<MultiplexedConnection, QueueError> {
        if let Some(conn) = self.blocking.lock().await.pop() {
            return Ok(conn);
        }
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn push_pending(&self, payloads: &[String]) -> Result<(), QueueError> {
        if payloads.is_empty() {
            return Ok(());
        }

        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        for payload in payloads {
            pipe.lpush(&self.pending_key, payload).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn move_to_processing(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        let mut conn = self.checkout_blocking().await?;
        // BRPOPLPUSH takes whole seconds; 0 would block forever.
        let timeout_secs = timeout.as_secs_f64().ceil().max(1.0) as u64;

        let result: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.pending_key)
            .arg(&self.processing_key)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        // Only healthy connections go back; errors above drop theirs.
        self.blocking.lock().await.push(conn);
        Ok(result)
    }

    async fn remove_processing(&self, payload: &str) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let removed: usize = conn.lrem(&self.processing_key, 1, payload).await?;
        Ok(removed)
    }

    async fn requeue_processing(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let mut moved = 0;

        // Each RPOPLPUSH is atomic on its own; the oldest reservation sits on
        // the right of processing and lands on the tail of pending.
        loop {
            let entry: Option<String> = conn
                .rpoplpush(&self.processing_key, &self.pending_key)
                .await?;
            if entry.is_none() {
                break;
            }
            moved += 1;
        }

        Ok(moved)
    }

    async fn peek_processing(&self, limit: usize) -> Result<Vec<String>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.clone();
        let start = -(limit.min(isize::MAX as usize) as isize);
        let mut entries: Vec<String> = conn.lrange(&self.processing_key, start, -1).await?;
        // LRANGE returns newest first; callers expect oldest first.
        entries.reverse();
        Ok(entries)
    }

    async fn pending_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.pending_key).await?;
        Ok(len)
    }

    async fn processing_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.processing_key).await?;
        Ok(len)
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.del(&self.pending_key).ignore().del(&self.processing_key).ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}
