//! Tracing and telemetry instrumentation for conveyor.
//!
//! Span constructors for the dispatch lifecycle plus recording helpers that
//! feed the `metrics` module when the `metrics` feature is enabled and are
//! no-ops otherwise.

use tracing::{info_span, Span};

/// Create a tracing span for a run invocation.
#[must_use]
pub fn run_span(instance_id: impl AsRef<str>, definition: impl AsRef<str>, replica: usize) -> Span {
    info_span!(
        "conveyor.run",
        instance_id = %instance_id.as_ref(),
        definition = %definition.as_ref(),
        replica,
    )
}

/// Create a tracing span for routing an item to a replica.
#[must_use]
pub fn route_span(instance_id: impl AsRef<str>, mode: impl AsRef<str>) -> Span {
    info_span!(
        "conveyor.route",
        instance_id = %instance_id.as_ref(),
        mode = %mode.as_ref(),
    )
}

/// Create a tracing span for an instance state change.
#[must_use]
pub fn state_span(instance_id: impl AsRef<str>, state: impl AsRef<str>) -> Span {
    info_span!(
        "conveyor.state",
        instance_id = %instance_id.as_ref(),
        state = %state.as_ref(),
    )
}

/// Record a finished run invocation.
///
/// `status` is one of `success`, `retryable`, `failed`.
pub fn record_run_outcome(definition: &str, status: &str, duration_secs: f64) {
    #[cfg(feature = "metrics")]
    {
        crate::metrics::RUNS_TOTAL
            .with_label_values(&[definition, status])
            .inc();
        crate::metrics::RUN_DURATION_SECONDS
            .with_label_values(&[definition, status])
            .observe(duration_secs);
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = (definition, status, duration_secs);
    }
}

/// Record items written to an output queue.
pub fn record_items_enqueued(definition: &str, queue: &str, count: usize) {
    #[cfg(feature = "metrics")]
    {
        crate::metrics::ITEMS_ENQUEUED_TOTAL
            .with_label_values(&[definition, queue])
            .inc_by(count as f64);
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = (definition, queue, count);
    }
}

/// Record the observed depth of a queue.
pub fn record_queue_depth(queue: &str, depth: usize) {
    #[cfg(feature = "metrics")]
    {
        crate::metrics::QUEUE_DEPTH
            .with_label_values(&[queue])
            .set(depth as f64);
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = (queue, depth);
    }
}
