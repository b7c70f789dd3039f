//! Worker pool for processing metadata jobs.
//!
//! Each worker runs as an independent async task and loops
//! reserve -> fetch -> persist -> acknowledge until the pool is shut down.
//! Workers share only the queue and a broadcast shutdown signal.
//!
//! # Features
//!
//! - Configurable number of workers (`<= 0` requested means the default)
//! - Per-job fetch timeout, separate from the reserve timeout
//! - Unconditional acknowledgement: a job that fails is never retried
//! - Graceful shutdown with broadcast channel
//! - Pool statistics and a stream of per-job reports

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::{ConfigError, WorkerPoolConfig};
use super::job::{JobOutcome, JobReport, MetadataJob, ReservedJob};
use super::queue::{JobQueue, QueueError};
use crate::fetcher::MetadataFetcher;
use crate::metrics::MetricsCollector;
use crate::sink::ResultSink;

/// Reports buffered per subscriber before old ones are dropped.
const REPORT_CHANNEL_CAPACITY: usize = 256;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A queue operation failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// The pool configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Lifecycle state of a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting on reserve.
    Idle,
    /// Working on a reserved job.
    Processing,
    /// Left its loop after the shutdown signal.
    Stopped,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Processing,
            _ => WorkerState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Idle => 0,
            WorkerState::Processing => 1,
            WorkerState::Stopped => 2,
        }
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently processing jobs.
    pub active_workers: usize,
    /// Total number of jobs whose metadata was stored.
    pub jobs_completed: u64,
    /// Total number of jobs that ended in any failure outcome.
    pub jobs_failed: u64,
    /// Average job processing duration.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of jobs processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record(&self, report: &JobReport) {
        if report.is_success() {
            self.jobs_completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        }
        self.total_duration_ms.fetch_add(report.duration_ms, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total_jobs = completed + failed;
        let average_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            jobs_completed: completed,
            jobs_failed: failed,
            average_job_duration: average_duration,
        }
    }
}

/// Worker pool that manages multiple workers processing jobs from a queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: JobQueue,
    fetcher: Arc<dyn MetadataFetcher>,
    sink: Arc<dyn ResultSink>,
    shutdown_tx: broadcast::Sender<()>,
    reports_tx: broadcast::Sender<JobReport>,
    worker_handles: Vec<JoinHandle<()>>,
    worker_states: Arc<Vec<AtomicU8>>,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a new worker pool.
    ///
    /// # Arguments
    ///
    /// * `config` - Pool configuration, validated here once
    /// * `queue` - Queue to reserve jobs from
    /// * `fetcher` - Fetches metadata for each job's URL
    /// * `sink` - Persists fetched metadata
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid.
    pub fn new(
        config: WorkerPoolConfig,
        queue: JobQueue,
        fetcher: Arc<dyn MetadataFetcher>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self, PoolError> {
        let config = config.resolved();
        config.validate()?;

        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);
        let (reports_tx, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            queue,
            fetcher,
            sink,
            shutdown_tx,
            reports_tx,
            worker_handles: Vec::new(),
            worker_states: Arc::new(Vec::new()),
            stats: Arc::new(SharedPoolStats::new()),
            metrics: MetricsCollector::new(),
            is_running: AtomicBool::new(false),
        })
    }

    /// Starts all workers in the pool.
    ///
    /// Workers begin reserving jobs immediately. When `recover_on_start` is
    /// set, in-flight jobs are first moved back to pending.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        if self.config.recover_on_start {
            match self.queue.requeue_abandoned().await {
                Ok(recovered) => {
                    info!(recovered = recovered, "Recovered jobs from processing queue");
                }
                Err(e) => {
                    warn!(error = %e, "Failed to recover processing jobs");
                }
            }
        }

        let states: Vec<AtomicU8> = (0..self.config.num_workers)
            .map(|_| AtomicU8::new(WorkerState::Idle.as_u8()))
            .collect();
        self.worker_states = Arc::new(states);

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: i,
                queue: self.queue.clone(),
                fetcher: Arc::clone(&self.fetcher),
                sink: Arc::clone(&self.sink),
                shutdown_rx: self.shutdown_tx.subscribe(),
                reports_tx: self.reports_tx.clone(),
                states: Arc::clone(&self.worker_states),
                reserve_timeout: self.config.reserve_timeout,
                fetch_timeout: self.config.fetch_timeout,
                error_backoff: self.config.error_backoff,
                stats: Arc::clone(&self.stats),
                metrics: self.metrics,
            };

            let handle = tokio::spawn(async move {
                worker.run().await;
            });

            self.worker_handles.push(handle);
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.config.num_workers, "Worker pool started");

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Sends the shutdown signal and waits for every worker to leave its
    /// loop. A worker in the middle of a job finishes and acknowledges it
    /// first, which the fetch timeout bounds. Idle workers stop at once when
    /// the queue's reserve is cancel safe; on Redis they first wait out the
    /// reserve in progress, which the reserve timeout bounds.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout. Those workers are left to finish on their own.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Ignore send error - workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let shutdown_future = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        let result = tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await;
        self.is_running.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    /// Subscribes to per-job reports.
    ///
    /// Only reports produced after subscribing are received.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<JobReport> {
        self.reports_tx.subscribe()
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Returns the current state of every worker, by index.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.worker_states
            .iter()
            .map(|s| WorkerState::from_u8(s.load(Ordering::SeqCst)))
            .collect()
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    /// Returns the job queue.
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }
}

/// A single worker that processes jobs from the queue.
struct Worker {
    /// Index of this worker, for logging.
    id: usize,
    queue: JobQueue,
    fetcher: Arc<dyn MetadataFetcher>,
    sink: Arc<dyn ResultSink>,
    shutdown_rx: broadcast::Receiver<()>,
    reports_tx: broadcast::Sender<JobReport>,
    states: Arc<Vec<AtomicU8>>,
    reserve_timeout: Duration,
    fetch_timeout: Duration,
    error_backoff: Duration,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
}

impl Worker {
    /// Main worker loop.
    ///
    /// Reserves and processes jobs until a shutdown signal is received,
    /// either between iterations or while blocked in a cancel-safe reserve.
    async fn run(mut self) {
        info!(worker_id = self.id, "Worker started");
        self.metrics.worker_started();

        loop {
            match self.shutdown_rx.try_recv() {
                Err(broadcast::error::TryRecvError::Empty) => {}
                // Signal sent, sender gone, or lagged past it: stop either way.
                _ => {
                    info!(worker_id = self.id, "Worker received shutdown signal");
                    break;
                }
            }

            self.set_state(WorkerState::Idle);

            let reserved = if self.queue.reserve_is_cancel_safe() {
                tokio::select! {
                    biased;
                    _ = self.shutdown_rx.recv() => {
                        info!(worker_id = self.id, "Worker received shutdown signal while waiting");
                        break;
                    }
                    result = self.queue.reserve(self.reserve_timeout) => result,
                }
            } else {
                // Runs to completion; a job it takes is processed before the
                // signal is seen at the top of the loop.
                self.queue.reserve(self.reserve_timeout).await
            };

            match reserved {
                Ok(Some(job)) => {
                    self.process_job(job).await;
                }
                Ok(None) => {
                    debug!(worker_id = self.id, "No jobs available");
                }
                Err(e @ QueueError::MalformedPayload { .. }) => {
                    // Already dropped from the in-flight list; nothing to wait for.
                    error!(worker_id = self.id, error = %e, "Skipped malformed job");
                }
                Err(e) => {
                    error!(worker_id = self.id, error = %e, "Failed to reserve job");
                    tokio::select! {
                        biased;
                        _ = self.shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(self.error_backoff) => {}
                    }
                }
            }
        }

        self.set_state(WorkerState::Stopped);
        self.metrics.worker_stopped();
        info!(worker_id = self.id, "Worker stopped");
    }

    /// Processes a single reserved job and acknowledges it.
    async fn process_job(&self, reserved: ReservedJob) -> JobReport {
        let job = reserved.job();
        let start_time = Instant::now();

        info!(
            worker_id = self.id,
            post_id = %job.post_id,
            link_id = %job.link_id,
            url = %job.url,
            "Processing job"
        );

        self.set_state(WorkerState::Processing);
        self.stats.increment_active();
        self.metrics.job_started();

        let report = self.execute(job, start_time).await;

        self.stats.decrement_active();
        self.metrics.job_finished();

        // Every outcome is terminal; the job leaves the in-flight list now.
        if let Err(e) = self.queue.acknowledge(&reserved).await {
            error!(
                worker_id = self.id,
                link_id = %job.link_id,
                error = %e,
                "Failed to acknowledge job"
            );
        }

        self.stats.record(&report);
        self.metrics.record_job(report.outcome.as_str(), report.duration_ms as f64 / 1000.0);

        if report.is_success() {
            info!(
                worker_id = self.id,
                link_id = %job.link_id,
                duration_ms = report.duration_ms,
                "Job completed successfully"
            );
        } else {
            warn!(
                worker_id = self.id,
                link_id = %job.link_id,
                url = %job.url,
                outcome = %report.outcome,
                error = ?report.error,
                "Job failed"
            );
        }

        // No subscribers is fine.
        let _ = self.reports_tx.send(report.clone());
        report
    }

    /// Fetches and persists metadata for one job.
    async fn execute(&self, job: &MetadataJob, start_time: Instant) -> JobReport {
        let elapsed_ms = || start_time.elapsed().as_millis() as u64;

        let fetched = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(&job.url)).await;

        let metadata = match fetched {
            Ok(Ok(metadata)) => metadata,
            Ok(Err(e)) => {
                return JobReport::failed(
                    job.link_id,
                    self.id,
                    JobOutcome::FetchFailed,
                    e.to_string(),
                    elapsed_ms(),
                );
            }
            Err(_) => {
                return JobReport::failed(
                    job.link_id,
                    self.id,
                    JobOutcome::TimedOut,
                    format!("fetch timed out after {:?}", self.fetch_timeout),
                    elapsed_ms(),
                );
            }
        };

        if let Err(e) = self.sink.persist(job.link_id, &metadata).await {
            let outcome = if e.is_not_found() {
                JobOutcome::LinkNotFound
            } else {
                JobOutcome::PersistFailed
            };
            return JobReport::failed(job.link_id, self.id, outcome, e.to_string(), elapsed_ms());
        }

        if let Err(e) = self.sink.notify(job.post_id, job.link_id, &metadata).await {
            warn!(
                worker_id = self.id,
                post_id = %job.post_id,
                link_id = %job.link_id,
                error = %e,
                "Failed to notify subscribers"
            );
        }

        JobReport::stored(job.link_id, self.id, elapsed_ms())
    }

    fn set_state(&self, state: WorkerState) {
        if let Some(slot) = self.states.get(self.id) {
            slot.store(state.as_u8(), Ordering::SeqCst);
        }
    }
}
