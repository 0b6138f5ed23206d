//! Prometheus metrics instrumentation for conveyor.
//!
//! All metrics are conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `conveyor_runs_total` - Run invocations by definition and status
//! - `conveyor_items_enqueued_total` - Items written to output queues
//!
//! ## Gauges
//! - `conveyor_queue_depth` - Observed depth of queues
//!
//! ## Histograms
//! - `conveyor_run_duration_seconds` - Run invocation duration in seconds
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, GaugeVec, HistogramVec, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for conveyor metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Counter for run invocations.
///
/// Labels:
/// - `definition`: The job definition name
/// - `status`: The outcome (success, retryable, failed)
pub static RUNS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("conveyor_runs_total", "Total number of run invocations");
    CounterVec::new(opts, &["definition", "status"])
        .expect("conveyor_runs_total metric creation failed")
});

/// Counter for items written to output queues.
///
/// Labels:
/// - `definition`: The producing job definition name
/// - `queue`: The destination queue name
pub static ITEMS_ENQUEUED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "conveyor_items_enqueued_total",
        "Total number of items written to output queues",
    );
    CounterVec::new(opts, &["definition", "queue"])
        .expect("conveyor_items_enqueued_total metric creation failed")
});

/// Gauge for observed queue depth.
///
/// Labels:
/// - `queue`: The queue name
pub static QUEUE_DEPTH: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new("conveyor_queue_depth", "Observed depth of queues");
    GaugeVec::new(opts, &["queue"]).expect("conveyor_queue_depth metric creation failed")
});

/// Histogram for run invocation duration in seconds.
///
/// Labels:
/// - `definition`: The job definition name
/// - `status`: The outcome (success, retryable, failed)
pub static RUN_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.001, 2.0, 15).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "conveyor_run_duration_seconds",
        "Run invocation duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["definition", "status"])
        .expect("conveyor_run_duration_seconds metric creation failed")
});

/// Register all conveyor metrics with the global registry.
///
/// Idempotent enough for test use: re-registration errors for already
/// registered collectors are ignored.
pub fn register_metrics() {
    let _ = REGISTRY.register(Box::new(RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ITEMS_ENQUEUED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(QUEUE_DEPTH.clone()));
    let _ = REGISTRY.register(Box::new(RUN_DURATION_SECONDS.clone()));
}
