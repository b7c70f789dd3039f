//! Job queue with reliable reserve/acknowledge semantics.
//!
//! This module provides the queue client used by producers and workers:
//!
//! - `enqueue`: append a job to the tail of the pending list
//! - `reserve`: atomically move the head of pending to the in-flight list
//! - `acknowledge`: drop a finished job from the in-flight list
//! - `requeue_abandoned`: move in-flight jobs back to pending after a crash
//!
//! # Reliability
//!
//! Delivery is at-least-once. A job stays in the in-flight list from the
//! moment it is reserved until it is acknowledged, so a worker that dies
//! mid-job leaves it there for recovery. No operation retries internally;
//! store errors are returned to the caller.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use super::config::QueueConfig;
use super::job::{MetadataJob, ReservedJob};
use super::store::{QueueStore, RedisStore};
use crate::metrics::MetricsCollector;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to the store.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Failed to serialize job data.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// A reserved payload could not be decoded. It has been dropped from the
    /// in-flight list.
    #[error("Malformed job payload {payload:?}: {reason}")]
    MalformedPayload { payload: String, reason: String },
}

/// Queue client shared by producers and workers.
///
/// Cloning is cheap and yields a handle to the same store.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn QueueStore>,
    metrics: MetricsCollector,
}

impl JobQueue {
    /// Creates a queue on top of an existing store.
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            metrics: MetricsCollector::new(),
        }
    }

    /// Connects to Redis and creates a queue using the configured keys.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(config: &QueueConfig) -> Result<Self, QueueError> {
        let store = RedisStore::connect(config).await?;
        Ok(Self::new(Arc::new(store)))
    }

    /// Appends a job to the tail of the pending list.
    ///
    /// Never waits for consumers. Callers creating user content should not
    /// fail their own operation on error; see [`JobQueue::enqueue_best_effort`].
    pub async fn enqueue(&self, job: &MetadataJob) -> Result<(), QueueError> {
        let payload = job.to_payload()?;
        self.store.push_pending(&[payload]).await
    }

    /// Enqueues multiple jobs in a single round trip, preserving order.
    pub async fn enqueue_batch(&self, jobs: &[MetadataJob]) -> Result<(), QueueError> {
        if jobs.is_empty() {
            return Ok(());
        }

        let payloads = jobs
            .iter()
            .map(MetadataJob::to_payload)
            .collect::<Result<Vec<_>, _>>()?;
        self.store.push_pending(&payloads).await
    }

    /// Enqueues a job, logging instead of returning failures.
    ///
    /// Returns whether the job was accepted. Metadata enrichment is optional,
    /// so a producer can call this and carry on either way.
    pub async fn enqueue_best_effort(&self, job: &MetadataJob) -> bool {
        match self.enqueue(job).await {
            Ok(()) => true,
            Err(e) => {
                self.metrics.record_enqueue_failure();
                warn!(
                    link_id = %job.link_id,
                    url = %job.url,
                    error = %e,
                    "Failed to enqueue metadata job"
                );
                false
            }
        }
    }

    /// Reserves the next job, blocking until one is available or timeout.
    ///
    /// The job is moved from pending to in-flight in one atomic store
    /// operation. The caller must [`acknowledge`](JobQueue::acknowledge) it
    /// once processing ends.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(job))` if a job was reserved
    /// - `Ok(None)` if the timeout expired with no jobs available
    ///
    /// # Errors
    ///
    /// Store failures, and `QueueError::MalformedPayload` when the reserved
    /// entry cannot be decoded. The malformed entry is removed from the
    /// in-flight list before returning so it is not recovered later.
    pub async fn reserve(&self, timeout: Duration) -> Result<Option<ReservedJob>, QueueError> {
        let Some(payload) = self.store.move_to_processing(timeout).await? else {
            return Ok(None);
        };

        match ReservedJob::from_payload(payload.clone()) {
            Ok(reserved) => Ok(Some(reserved)),
            Err(e) => {
                if let Err(remove_err) = self.store.remove_processing(&payload).await {
                    warn!(
                        error = %remove_err,
                        "Failed to drop malformed payload from processing list"
                    );
                }
                Err(QueueError::MalformedPayload {
                    payload,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Returns whether a `reserve` future may be dropped before it resolves.
    ///
    /// When this is false (Redis), abandoning a reserve can leave a job in
    /// the in-flight list with no worker holding it.
    pub fn reserve_is_cancel_safe(&self) -> bool {
        self.store.cancel_safe_move()
    }

    /// Removes a finished job from the in-flight list.
    ///
    /// Idempotent: acknowledging a job that is no longer in flight is not an
    /// error.
    pub async fn acknowledge(&self, job: &ReservedJob) -> Result<(), QueueError> {
        self.store.remove_processing(job.payload()).await?;
        Ok(())
    }

    /// Moves every in-flight job back to the tail of pending.
    ///
    /// Returns the number of jobs moved.
    ///
    /// **Warning**: this cannot tell abandoned jobs from jobs a live worker is
    /// still processing. Run it only when no worker is active against this
    /// queue (planned maintenance, or after the whole worker fleet died);
    /// otherwise those jobs will be processed twice.
    pub async fn requeue_abandoned(&self) -> Result<usize, QueueError> {
        let moved = self.store.requeue_processing().await?;
        if moved > 0 {
            self.metrics.record_requeued(moved);
            info!(moved = moved, "Requeued abandoned jobs");
        }
        Ok(moved)
    }

    /// Returns the number of jobs waiting to be reserved.
    pub async fn len(&self) -> Result<usize, QueueError> {
        self.store.pending_len().await
    }

    /// Returns the number of jobs currently reserved.
    pub async fn processing_len(&self) -> Result<usize, QueueError> {
        self.store.processing_len().await
    }

    /// Returns whether the pending list is empty.
    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Returns queue statistics.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let (pending_jobs, processing_jobs) = tokio::try_join!(self.len(), self.processing_len())?;

        Ok(QueueStats {
            pending_jobs,
            processing_jobs,
        })
    }

    /// Peeks at up to `limit` in-flight jobs, oldest reservation first.
    ///
    /// Entries that fail to decode are skipped.
    pub async fn peek_in_flight(&self, limit: usize) -> Result<Vec<MetadataJob>, QueueError> {
        let payloads = self.store.peek_processing(limit).await?;
        Ok(payloads
            .iter()
            .filter_map(|p| MetadataJob::from_payload(p).ok())
            .collect())
    }

    /// Clears both lists.
    ///
    /// **Warning**: This permanently deletes all jobs. Use with caution.
    pub async fn clear(&self) -> Result<(), QueueError> {
        self.store.clear().await
    }
}

/// Statistics about queue state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    /// Number of jobs waiting to be processed.
    pub pending_jobs: usize,
    /// Number of jobs currently being processed.
    pub processing_jobs: usize,
}

impl QueueStats {
    /// Returns the total number of jobs in both lists.
    pub fn total_jobs(&self) -> usize {
        self.pending_jobs + self.processing_jobs
    }
}
