//! Metric instrument factories for paramjob.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"paramjob"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for paramjob instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("paramjob")
}

/// Counter: messages delivered by the broker.
/// Labels: `result` ("queued" | "discarded").
pub fn inbound_messages() -> Counter<u64> {
    meter()
        .u64_counter("paramjob.queue.inbound")
        .with_description("Messages delivered by the broker")
        .build()
}

/// Counter: work units handed out by producers.
/// Labels: `producer`.
pub fn work_produced() -> Counter<u64> {
    meter()
        .u64_counter("paramjob.work.produced")
        .with_description("Number of work units produced")
        .build()
}

/// Counter: work units rejected during validation.
/// Labels: `producer`.
pub fn work_rejected() -> Counter<u64> {
    meter()
        .u64_counter("paramjob.work.rejected")
        .with_description("Number of work units that failed validation")
        .build()
}

/// Counter: acknowledgments sent to requesters.
/// Labels: `result` ("ok" | "error").
pub fn replies() -> Counter<u64> {
    meter()
        .u64_counter("paramjob.reply.published")
        .with_description("Number of replies published to requesters")
        .build()
}

/// Counter: command executions.
/// Labels: `consumer`, `result` ("ok" | "error").
pub fn executions() -> Counter<u64> {
    meter()
        .u64_counter("paramjob.command.executions")
        .with_description("Number of command executions")
        .build()
}

/// Histogram: command execution duration in milliseconds.
/// Labels: `consumer`.
pub fn execution_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("paramjob.command.duration_ms")
        .with_description("Command execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
