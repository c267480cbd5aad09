//! Metric instrument factories for sqs-notify-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"sqs-notify-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for sqs-notify-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("sqs-notify-rs")
}

/// Counter: queue-level operations (create, send, receive, delete).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("sqs_notify.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: messages received from the queue.
/// Labels: `queue`.
pub fn messages_received() -> Counter<u64> {
    meter()
        .u64_counter("sqs_notify.messages.received")
        .with_description("Number of messages received")
        .build()
}

/// Counter: per-message outcome.
/// Labels: `queue`, `outcome` ("succeeded" | "failed" | "duplicate_running" | "duplicate_completed").
pub fn message_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("sqs_notify.messages.outcomes")
        .with_description("Number of messages by dispatch outcome")
        .build()
}

/// Counter: messages acknowledged (deleted) from the queue.
/// Labels: `queue`.
pub fn messages_deleted() -> Counter<u64> {
    meter()
        .u64_counter("sqs_notify.messages.deleted")
        .with_description("Number of messages deleted after handling")
        .build()
}

/// Counter: ids evicted from the job tracker at capacity.
pub fn tracker_evictions() -> Counter<u64> {
    meter()
        .u64_counter("sqs_notify.tracker.evictions")
        .with_description("Job tracker FIFO evictions")
        .build()
}

/// Histogram: handler duration in milliseconds.
/// Labels: `queue`, `success`.
pub fn handler_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("sqs_notify.handler.duration_ms")
        .with_description("Handler process duration in milliseconds")
        .with_unit("ms")
        .build()
}
