//! In-process queue store.
//!
//! Useful for tests and single-process deployments. Both lists live behind a
//! single mutex, so moving an entry between them is atomic with respect to
//! every other operation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::QueueStore;
use crate::scheduler::queue::QueueError;

#[derive(Debug, Default)]
struct Lists {
    pending: VecDeque<String>,
    // Oldest reservation at the front.
    processing: VecDeque<String>,
}

/// In-memory implementation of [`QueueStore`].
///
/// Cloning creates a new handle to the **same** lists.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    lists: Arc<Mutex<Lists>>,
    notify: Arc<Notify>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn push_pending(&self, payloads: &[String]) -> Result<(), QueueError> {
        {
            let mut lists = self.lists.lock().await;
            lists.pending.extend(payloads.iter().cloned());
        }
        for _ in payloads {
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn move_to_processing(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a push between the check
            // and the wait is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut lists = self.lists.lock().await;
                if let Some(payload) = lists.pending.pop_front() {
                    lists.processing.push_back(payload.clone());
                    return Ok(Some(payload));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    // Pop and push happen under one lock with no await in between.
    fn cancel_safe_move(&self) -> bool {
        true
    }

    async fn remove_processing(&self, payload: &str) -> Result<usize, QueueError> {
        let mut lists = self.lists.lock().await;
        match lists.processing.iter().position(|p| p == payload) {
            Some(index) => {
                lists.processing.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn requeue_processing(&self) -> Result<usize, QueueError> {
        let moved = {
            let mut lists = self.lists.lock().await;
            let drained: Vec<String> = lists.processing.drain(..).collect();
            let moved = drained.len();
            lists.pending.extend(drained);
            moved
        };
        for _ in 0..moved {
            self.notify.notify_one();
        }
        Ok(moved)
    }

    async fn peek_processing(&self, limit: usize) -> Result<Vec<String>, QueueError> {
        let lists = self.lists.lock().await;
        Ok(lists.processing.iter().take(limit).cloned().collect())
    }

    async fn pending_len(&self) -> Result<usize, QueueError> {
        Ok(self.lists.lock().await.pending.len())
    }

    async fn processing_len(&self) -> Result<usize, QueueError> {
        Ok(self.lists.lock().await.processing.len())
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let mut lists = self.lists.lock().await;
        lists.pending.clear();
        lists.processing.clear();
        Ok(())
    }
}
