//! In-memory result sink.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use super::ResultSink;
use crate::error::SinkError;
use crate::fetcher::LinkMetadata;

#[derive(Debug, Default)]
struct State {
    metadata: HashMap<Uuid, LinkMetadata>,
    // When set, only these links exist.
    known_links: Option<HashSet<Uuid>>,
    writes: usize,
    notifications: Vec<(Uuid, Uuid)>,
}

/// Keeps metadata in a map keyed by link id.
///
/// Cloning creates a new handle to the **same** map.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<RwLock<State>>,
}

impl MemorySink {
    /// Creates a sink that accepts any link id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink where only `links` exist; others are `NotFound`.
    pub fn with_known_links(links: impl IntoIterator<Item = Uuid>) -> Self {
        let sink = Self::default();
        if let Ok(mut state) = sink.state.write() {
            state.known_links = Some(links.into_iter().collect());
        }
        sink
    }

    /// Returns the stored metadata for a link.
    pub fn get(&self, link_id: Uuid) -> Option<LinkMetadata> {
        self.state
            .read()
            .ok()
            .and_then(|state| state.metadata.get(&link_id).cloned())
    }

    /// Number of links with stored metadata.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.metadata.len()).unwrap_or(0)
    }

    /// Returns whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total successful `persist` calls, including overwrites.
    pub fn writes(&self) -> usize {
        self.state.read().map(|s| s.writes).unwrap_or(0)
    }

    /// `(post_id, link_id)` pairs passed to `notify`, in call order.
    pub fn notifications(&self) -> Vec<(Uuid, Uuid)> {
        self.state
            .read()
            .map(|s| s.notifications.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn persist(&self, link_id: Uuid, metadata: &LinkMetadata) -> Result<(), SinkError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| SinkError::Other("memory sink lock poisoned".to_string()))?;

        if let Some(known) = &state.known_links {
            if !known.contains(&link_id) {
                return Err(SinkError::NotFound(link_id));
            }
        }

        state.metadata.insert(link_id, metadata.clone());
        state.writes += 1;
        Ok(())
    }

    async fn notify(
        &self,
        post_id: Uuid,
        link_id: Uuid,
        _metadata: &LinkMetadata,
    ) -> Result<(), SinkError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| SinkError::Other("memory sink lock poisoned".to_string()))?;
        state.notifications.push((post_id, link_id));
        Ok(())
    }
}
