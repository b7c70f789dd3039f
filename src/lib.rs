//! linkmeta: background link-preview metadata fetching.
//!
//! Producers enqueue one job per link of a post; a pool of workers reserves
//! jobs from a Redis-backed queue, fetches the page's metadata and stores it.

pub mod cli;
pub mod error;
pub mod fetcher;
pub mod metrics;
pub mod scheduler;
pub mod sink;

// Re-export commonly used types
pub use error::{FetchError, SinkError};
pub use fetcher::{LinkMetadata, MetadataFetcher};
pub use scheduler::{JobQueue, MetadataJob, QueueError, WorkerPool, WorkerPoolConfig};
pub use sink::ResultSink;
