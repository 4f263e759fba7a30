//! Span helpers for queue operations.

use tracing::Span;

/// Start a span for one queue operation.
///
/// `plan.selected` is declared empty and filled in by
/// [`record_plan_result`].
pub fn start_plan_span(operation: &str, queue: &str, group: Option<&str>, client: &str) -> Span {
    tracing::info_span!(
        "queue.op",
        "queue.operation" = operation,
        "queue.name" = queue,
        "queue.group" = group.unwrap_or(""),
        "client.id" = client,
        "plan.selected" = tracing::field::Empty,
    )
}

/// Record how many events the operation's plan selected.
pub fn record_plan_result(span: &Span, selected: usize) {
    span.record("plan.selected", selected as u64);
}
