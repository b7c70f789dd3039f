//! Metric recording helpers for queue and worker operations.
//!
//! `MetricsCollector` wraps the raw Prometheus metrics so call sites don't
//! deal with labels or uninitialized registries. Every method is a no-op
//! until `init_metrics()` has run.

use super::prometheus::{
    ACTIVE_WORKERS, ENQUEUE_FAILURES, JOBS_IN_PROGRESS, JOBS_REQUEUED, JOBS_TOTAL, JOB_DURATION,
    QUEUE_DEPTH,
};

/// Metrics collector for recording linkmeta operational metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Record one finished job.
    ///
    /// # Arguments
    ///
    /// * `outcome` - Outcome label (e.g., "stored", "fetch_failed")
    /// * `duration_secs` - Processing duration in seconds
    pub fn record_job(&self, outcome: &str, duration_secs: f64) {
        if let Some(jobs_total) = JOBS_TOTAL.get() {
            jobs_total.with_label_values(&[outcome]).inc();
        }

        if let Some(job_duration) = JOB_DURATION.get() {
            job_duration
                .with_label_values(&[outcome])
                .observe(duration_secs);
        }

        tracing::trace!(
            outcome = outcome,
            duration_secs = duration_secs,
            "Recorded job metric"
        );
    }

    /// Increment the in-progress gauge when a worker picks up a job.
    pub fn job_started(&self) {
        if let Some(gauge) = JOBS_IN_PROGRESS.get() {
            gauge.inc();
        }
    }

    /// Decrement the in-progress gauge when a worker finishes a job.
    pub fn job_finished(&self) {
        if let Some(gauge) = JOBS_IN_PROGRESS.get() {
            gauge.dec();
        }
    }

    /// Set the depth of both queue lists.
    pub fn set_queue_depth(&self, pending: usize, processing: usize) {
        if let Some(depth) = QUEUE_DEPTH.get() {
            depth.with_label_values(&["pending"]).set(pending as f64);
            depth.with_label_values(&["processing"]).set(processing as f64);
        }
    }

    /// Record jobs moved back to pending by recovery.
    pub fn record_requeued(&self, count: usize) {
        if let Some(counter) = JOBS_REQUEUED.get() {
            counter.inc_by(count as f64);
        }
    }

    /// Record a failed enqueue.
    pub fn record_enqueue_failure(&self) {
        if let Some(counter) = ENQUEUE_FAILURES.get() {
            counter.inc();
        }
    }

    /// Mark a worker as started.
    pub fn worker_started(&self) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.inc();
        }
    }

    /// Mark a worker as stopped.
    pub fn worker_stopped(&self) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.dec();
        }
    }
}
