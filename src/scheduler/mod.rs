//! Link-metadata job queue and the worker pool that drains it.
//!
//! - **JobQueue**: reliable FIFO queue over Redis lists, reserving with BRPOPLPUSH
//! - **WorkerPool**: pool of workers that fetch and persist metadata concurrently
//! - **MetadataJob**: the unit of work, one link of one post
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │   Producer   │
//!                      │ (post write) │
//!                      └──────┬───────┘
//!                             │ enqueue
//!                      ┌──────▼───────┐      reserve      ┌──────────────┐
//!                      │   pending    │ ────────────────► │  processing  │
//!                      └──────────────┘ ◄──────────────── └──────┬───────┘
//!                                       requeue_abandoned        │
//!         ┌───────────────────┬───────────────────┬──────────────┘
//!         │                   │                   │     acknowledge
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 0│         │ Worker 1│         │ Worker N│
//!    └─────────┘         └─────────┘         └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use linkmeta::fetcher::HttpMetadataFetcher;
//! use linkmeta::scheduler::{JobQueue, MetadataJob, QueueConfig, WorkerPool, WorkerPoolConfig};
//! use linkmeta::sink::PostgresSink;
//! use std::sync::Arc;
//!
//! let queue = JobQueue::connect(&QueueConfig::new("redis://localhost:6379")).await?;
//! queue.enqueue(&MetadataJob::new(post_id, link_id, "https://example.com")).await?;
//!
//! let config = WorkerPoolConfig::new(0);
//! let fetcher = Arc::new(HttpMetadataFetcher::new(config.fetch_timeout)?);
//! let sink = Arc::new(PostgresSink::connect(&database_url).await?);
//!
//! let mut pool = WorkerPool::new(config, queue, fetcher, sink)?;
//! pool.start().await?;
//!
//! // Graceful shutdown
//! pool.shutdown().await?;
//! ```
//!
//! # Delivery guarantees
//!
//! - **Atomic reserve**: a job moves from pending to processing in one step, so
//!   no two workers ever hold the same job
//! - **At-least-once**: a job reserved by a crashed worker stays in processing
//!   until an operator runs `requeue_abandoned`
//! - **No retries**: every outcome, success or failure, acknowledges the job

pub mod config;
pub mod job;
pub mod queue;
pub mod store;
pub mod worker_pool;

// Re-export main types for convenience
pub use config::{ConfigError, QueueConfig, WorkerPoolConfig};
pub use job::{JobOutcome, JobReport, MetadataJob, ReservedJob};
pub use queue::{JobQueue, QueueError, QueueStats};
pub use store::{MemoryStore, QueueStore, RedisStore};
pub use worker_pool::{PoolError, PoolStats, WorkerPool, WorkerState};
