//! Message handling span helpers.
//!
//! One span per received message, covering the dedup decision, the
//! handler run, and the tracker update.

use tracing::Span;

use crate::jobs::JobState;

/// Start a span for handling one queue message.
///
/// `message.decision` and `message.outcome` are declared empty and filled
/// in by [`record_decision`] and [`record_outcome`].
pub fn start_message_span(queue: &str, msg_id: &str, read_ct: i32) -> Span {
    tracing::info_span!(
        "message.handle",
        "messaging.system" = "pgmq",
        "messaging.destination.name" = queue,
        "messaging.message.id" = msg_id,
        "message.read_ct" = read_ct,
        "message.decision" = tracing::field::Empty,
        "message.outcome" = tracing::field::Empty,
    )
}

/// Record what the job tracker said about this delivery.
pub fn record_decision(span: &Span, state: JobState) {
    span.record("message.decision", tracing::field::display(state));
    span.in_scope(|| {
        tracing::debug!(decision = %state, "tracker decision");
    });
}

/// Record the final outcome label on the span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("message.outcome", outcome);
}
