//! Metrics module for Prometheus-based monitoring.
//!
//! Queue depth, job outcomes and worker counts are recorded here so that
//! operators can alert on a growing backlog or a stuck in-flight list; the
//! queue itself never applies backpressure.
//!
//! # Example
//!
//! ```ignore
//! use linkmeta::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_job("stored", 0.8);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};
