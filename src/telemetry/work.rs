//! Work dispatch span helpers.
//!
//! Provides span creation and stage recording for work units flowing from a
//! producer to the consumers.

use crate::model::WorkId;
use tracing::Span;

/// Start a span covering the fan-out of one validated work unit.
///
/// The `work.stage` field is declared empty and can be updated via
/// [`record_stage`].
pub fn start_work_span(subject: &str, work_id: &WorkId) -> Span {
    tracing::info_span!(
        "work.dispatch",
        "work.subject" = subject,
        "work.id" = %work_id,
        "work.stage" = tracing::field::Empty,
    )
}

/// Record that the unit entered `stage`.
///
/// Emits a tracing `info` event scoped to the given span.
pub fn record_stage(span: &Span, stage: &'static str) {
    span.record("work.stage", stage);
    span.in_scope(|| {
        tracing::info!(stage, "stage");
    });
}
