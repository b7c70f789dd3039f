//! Storage backends for the metadata queue.
//!
//! A backend holds two lists of serialized jobs:
//!
//! - `pending`: appended at the tail, consumed from the head (FIFO)
//! - `processing`: payloads that have been reserved but not acknowledged
//!
//! The only cross-worker coordination is `move_to_processing`, which every
//! backend must implement as a single indivisible step. No client-side locks
//! are taken around it.

use std::time::Duration;

use async_trait::async_trait;

use super::queue::QueueError;

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// List operations the queue needs from its backing store.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Appends payloads to the tail of `pending`, in order.
    async fn push_pending(&self, payloads: &[String]) -> Result<(), QueueError>;

    /// Atomically moves the head of `pending` to `processing`.
    ///
    /// Waits up to `timeout` for an entry. Returns `Ok(None)` if nothing
    /// arrived in time.
    async fn move_to_processing(&self, timeout: Duration) -> Result<Option<String>, QueueError>;

    /// Whether dropping a pending `move_to_processing` future is harmless.
    ///
    /// A server-side blocking move may already have taken an entry when the
    /// caller stops waiting; that entry is then stranded in `processing`.
    /// Callers must let such a move run to completion.
    fn cancel_safe_move(&self) -> bool {
        false
    }

    /// Removes one occurrence of `payload` from `processing`.
    ///
    /// Returns the number of entries removed (0 or 1).
    async fn remove_processing(&self, payload: &str) -> Result<usize, QueueError>;

    /// Moves every `processing` entry back to the tail of `pending`.
    ///
    /// Entries are moved oldest reservation first. Returns how many moved.
    async fn requeue_processing(&self) -> Result<usize, QueueError>;

    /// Returns up to `limit` payloads from `processing`, oldest first.
    async fn peek_processing(&self, limit: usize) -> Result<Vec<String>, QueueError>;

    /// Number of entries in `pending`.
    async fn pending_len(&self) -> Result<usize, QueueError>;

    /// Number of entries in `processing`.
    async fn processing_len(&self) -> Result<usize, QueueError>;

    /// Deletes both lists.
    async fn clear(&self) -> Result<(), QueueError>;
}
