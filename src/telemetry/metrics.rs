//! Metric instruments.
//!
//! Created from the `"scoreq"` meter of the globally registered
//! `MeterProvider`; without one they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("scoreq")
}

/// Counter: plan executions issued by queue operations.
/// Labels: `queue`, `operation` ("add" | "get" | "ack" | "sweep" | "purge" | "len"),
/// `result` ("selected" | "empty" | "error").
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("scoreq.queue.operations")
        .with_description("Number of queue plan executions")
        .build()
}

/// Histogram: wall time of one plan execution, store round-trip included.
/// Labels: `operation`.
pub fn plan_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("scoreq.plan.duration_ms")
        .with_description("Plan execution duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: events moved back to redo after missing their ack deadline.
/// Labels: `queue`, `group`.
pub fn sweep_requeued() -> Counter<u64> {
    meter()
        .u64_counter("scoreq.sweep.requeued")
        .with_description("Events requeued for redelivery")
        .build()
}
