//! Error types for the queue's external collaborators.
//!
//! The queue and worker pool define their own errors next to the code that
//! raises them (`QueueError`, `PoolError`, `ConfigError`). This module holds
//! the errors of the two pluggable contracts a worker drives:
//! - Fetching link metadata from a remote URL
//! - Persisting fetched metadata and notifying subscribers

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while fetching link metadata.
///
/// Every variant is terminal for the job that produced it.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Remote returned HTTP {status} for {url}")]
    BadStatus { url: String, status: u16 },

    #[error("Response is not HTML (content type '{0}')")]
    NotHtml(String),

    #[error("No metadata found at {0}")]
    NoMetadata(String),

    #[error("Fetch failed: {0}")]
    Other(String),
}

/// Errors that can occur while persisting fetched metadata.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Link {0} not found")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sink failed: {0}")]
    Other(String),
}

impl SinkError {
    /// Returns whether the target link is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SinkError::NotFound(_))
    }
}
