//! Job definitions for the metadata queue.
//!
//! This module defines the core job types used in the scheduling system:
//!
//! - `MetadataJob`: the immutable record a producer enqueues
//! - `ReservedJob`: a job handed to a worker, together with its exact payload
//! - `JobOutcome`: how one processing attempt ended
//! - `JobReport`: outcome plus timing for one attempt

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A request to fetch preview metadata for one link.
///
/// This is the only thing stored in the queue. It is serialized once at
/// enqueue time and never modified afterwards; workers read it and produce a
/// separate `LinkMetadata` value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataJob {
    /// Post the link belongs to.
    pub post_id: Uuid,
    /// Link row the fetched metadata will be written to.
    pub link_id: Uuid,
    /// The URL to fetch.
    pub url: String,
    /// When the job was created by the producer.
    pub created_at: DateTime<Utc>,
}

impl MetadataJob {
    /// Creates a new job stamped with the current time.
    pub fn new(post_id: Uuid, link_id: Uuid, url: impl Into<String>) -> Self {
        Self {
            post_id,
            link_id,
            url: url.into(),
            created_at: Utc::now(),
        }
    }

    /// Serializes the job into its queue payload.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a queue payload back into a job.
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Returns how long ago the job was created.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

/// A job that has been moved to the in-flight list.
///
/// Keeps the payload exactly as it was read from the store, so that
/// acknowledging removes the same bytes even if re-serializing the job would
/// produce a different string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedJob {
    job: MetadataJob,
    payload: String,
}

impl ReservedJob {
    /// Decodes a payload that was just reserved.
    pub fn from_payload(payload: String) -> Result<Self, serde_json::Error> {
        let job = MetadataJob::from_payload(&payload)?;
        Ok(Self { job, payload })
    }

    /// The decoded job.
    pub fn job(&self) -> &MetadataJob {
        &self.job
    }

    /// The raw payload as stored in the in-flight list.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Consumes the reservation, returning the job.
    pub fn into_job(self) -> MetadataJob {
        self.job
    }
}

/// How a single processing attempt ended.
///
/// Every outcome is terminal for the job: the worker acknowledges it in all
/// cases and nothing is resubmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// Metadata was fetched and persisted.
    Stored,
    /// The fetcher returned an error.
    FetchFailed,
    /// The fetcher did not finish within the fetch timeout.
    TimedOut,
    /// Metadata was fetched but the sink failed to persist it.
    PersistFailed,
    /// The sink reported that the link no longer exists.
    LinkNotFound,
}

impl JobOutcome {
    /// Returns whether metadata ended up persisted.
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Stored)
    }

    /// Label used for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Stored => "stored",
            JobOutcome::FetchFailed => "fetch_failed",
            JobOutcome::TimedOut => "timed_out",
            JobOutcome::PersistFailed => "persist_failed",
            JobOutcome::LinkNotFound => "link_not_found",
        }
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one processing attempt, as seen by the worker that ran it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    /// Link the job was for.
    pub link_id: Uuid,
    /// How the attempt ended.
    pub outcome: JobOutcome,
    /// Error message for failed attempts.
    pub error: Option<String>,
    /// Index of the worker that processed the job.
    pub worker_id: usize,
    /// Duration of the attempt in milliseconds.
    pub duration_ms: u64,
    /// When the attempt finished.
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    /// Creates a report for a successful attempt.
    pub fn stored(link_id: Uuid, worker_id: usize, duration_ms: u64) -> Self {
        Self {
            link_id,
            outcome: JobOutcome::Stored,
            error: None,
            worker_id,
            duration_ms,
            finished_at: Utc::now(),
        }
    }

    /// Creates a report for a failed attempt.
    pub fn failed(
        link_id: Uuid,
        worker_id: usize,
        outcome: JobOutcome,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            link_id,
            outcome,
            error: Some(error.into()),
            worker_id,
            duration_ms,
            finished_at: Utc::now(),
        }
    }

    /// Returns whether the attempt stored metadata.
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}
