//! Pool span helpers.
//!
//! Provides span creation for pool runs and worker threads, and mode
//! transition recording for the master loop.

use tracing::Span;
use uuid::Uuid;

/// Start a span covering one pool run.
pub fn start_run_span(run_id: &Uuid, processes: usize) -> Span {
    tracing::info_span!(
        "pool.run",
        "pool.run_id" = %run_id,
        "pool.processes" = processes,
        "pool.mode" = tracing::field::Empty,
    )
}

/// Start a span for one worker thread of a run.
pub fn start_worker_span(run_id: &Uuid, worker: usize) -> Span {
    tracing::info_span!(
        "pool.worker",
        "pool.run_id" = %run_id,
        "pool.worker" = worker,
    )
}

/// Record a NORMAL/BONUS mode transition on the given span.
///
/// Updates `pool.mode` when the span declares it, and emits an `info` event
/// scoped to the span.
pub fn record_mode_transition(span: &Span, from: &str, to: &str) {
    span.record("pool.mode", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "mode_transition");
    });
}
