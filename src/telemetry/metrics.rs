//! Metric instrument factories for workq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"workq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for workq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("workq")
}

/// Counter: work items accepted into the queue.
pub fn work_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("workq.work.enqueued")
        .with_description("Number of work items accepted into the queue")
        .build()
}

/// Counter: work items handed to a worker.
pub fn work_delivered() -> Counter<u64> {
    meter()
        .u64_counter("workq.work.delivered")
        .with_description("Number of work items delivered to workers")
        .build()
}

/// Counter: pending items dropped because a newer item for the same owner
/// arrived.
pub fn work_superseded() -> Counter<u64> {
    meter()
        .u64_counter("workq.work.superseded")
        .with_description("Number of superseded work items pruned from the queue")
        .build()
}

/// Counter: retry requests.
/// Labels: `result` ("requeued" | "exhausted").
pub fn work_retried() -> Counter<u64> {
    meter()
        .u64_counter("workq.work.retried")
        .with_description("Number of retry requests")
        .build()
}

/// Counter: producer calls made inside a bonus round.
/// Labels: `outcome` ("empty" | "new_work").
pub fn bonus_rounds() -> Counter<u64> {
    meter()
        .u64_counter("workq.bonus.rounds")
        .with_description("Number of confirmation polls made during bonus rounds")
        .build()
}

/// Counter: producer calls that returned an error or panicked.
pub fn producer_errors() -> Counter<u64> {
    meter()
        .u64_counter("workq.producer.errors")
        .with_description("Number of failed producer calls")
        .build()
}

/// Counter: worker callbacks that failed and aborted the run.
pub fn worker_failures() -> Counter<u64> {
    meter()
        .u64_counter("workq.worker.failures")
        .with_description("Number of worker failures")
        .build()
}

/// Histogram: wall time of a pool run in milliseconds.
pub fn run_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("workq.run.duration_ms")
        .with_description("Pool run duration in milliseconds")
        .with_unit("ms")
        .build()
}
