//! Destinations for fetched link metadata.
//!
//! A job can be delivered more than once (after a crash and requeue), so
//! [`ResultSink::persist`] must overwrite whatever is stored for the link
//! rather than append to it.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::SinkError;
use crate::fetcher::LinkMetadata;

mod memory;
mod postgres;

pub use memory::MemorySink;
pub use postgres::PostgresSink;

/// Persists fetched metadata and tells interested parties about it.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Stores `metadata` for `link_id`, replacing any previous value.
    ///
    /// Returns `SinkError::NotFound` if the link does not exist.
    async fn persist(&self, link_id: Uuid, metadata: &LinkMetadata) -> Result<(), SinkError>;

    /// Announces freshly stored metadata to subscribers of `post_id`.
    ///
    /// Best-effort; failures are logged by the caller and otherwise ignored.
    async fn notify(
        &self,
        _post_id: Uuid,
        _link_id: Uuid,
        _metadata: &LinkMetadata,
    ) -> Result<(), SinkError> {
        Ok(())
    }
}
