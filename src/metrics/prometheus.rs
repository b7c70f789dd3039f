//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by linkmeta and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{Mutex, OnceLock};

/// Serializes initialization so every metric lands in the stored registry.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Global Prometheus registry for all linkmeta metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total jobs processed, labeled by outcome.
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Job processing duration in seconds, labeled by outcome.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of jobs in each queue list, labeled by list ("pending"/"processing").
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of jobs currently being processed.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Number of running workers.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Total jobs moved from in-flight back to pending.
pub static JOBS_REQUEUED: OnceLock<Counter> = OnceLock::new();

/// Total enqueue calls that failed.
pub static ENQUEUE_FAILURES: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// This function should be called once at application startup. Calling it
/// again is harmless: the first set of metrics stays in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    // Job metrics
    let jobs_total = CounterVec::new(
        Opts::new("linkmeta_jobs_total", "Total number of metadata jobs processed"),
        &["outcome"],
    )?;

    let job_duration = HistogramVec::new(
        HistogramOpts::new(
            "linkmeta_job_duration_seconds",
            "Metadata job processing duration in seconds",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["outcome"],
    )?;

    let jobs_in_progress = Gauge::new(
        "linkmeta_jobs_in_progress",
        "Number of jobs currently being processed",
    )?;

    // Queue metrics
    let queue_depth = GaugeVec::new(
        Opts::new("linkmeta_queue_depth", "Number of jobs in each queue list"),
        &["list"],
    )?;

    let jobs_requeued = Counter::new(
        "linkmeta_jobs_requeued_total",
        "Total jobs moved from in-flight back to pending",
    )?;

    let enqueue_failures = Counter::new(
        "linkmeta_enqueue_failures_total",
        "Total enqueue attempts that failed",
    )?;

    // Worker metrics
    let active_workers = Gauge::new("linkmeta_active_workers", "Number of running workers")?;

    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(jobs_requeued.clone()))?;
    registry.register(Box::new(enqueue_failures.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = JOBS_REQUEUED.set(jobs_requeued);
    let _ = ENQUEUE_FAILURES.set(enqueue_failures);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = REGISTRY.set(registry);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line instead if the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        // Global state: a second init from another test is fine.
        let result = init_metrics();
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();

        if let Some(jobs_total) = JOBS_TOTAL.get() {
            jobs_total.with_label_values(&["stored"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("linkmeta_jobs_total"));
    }
}
