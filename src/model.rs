//! Core data model.
//!
//! A work item names one unit of work and the owner it belongs to. Only the
//! newest work item per owner is live; older ones are superseded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;

// ---------------------------------------------------------------------------
// Work
// ---------------------------------------------------------------------------

/// A unit of work handed to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Work {
    /// Unique identifier of this unit of work.
    pub result_id: i64,

    /// Grouping key. Only the most recent `result_id` enqueued for an owner
    /// is delivered.
    pub owner_id: i64,
}

impl Work {
    pub fn new(result_id: i64, owner_id: i64) -> Self {
        Self {
            result_id,
            owner_id,
        }
    }
}

impl std::fmt::Display for Work {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.result_id, self.owner_id)
    }
}

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

/// Envelope around an error raised inside a worker.
///
/// Carries the original error (downcastable via [`Failure::error`]) and a
/// rendered trace, so it can be handed out of the worker thread and
/// re-raised by the coordinator.
#[derive(Debug)]
pub struct Failure {
    /// Index of the worker that failed.
    pub worker: usize,
    pub failed_at: DateTime<Utc>,
    error: anyhow::Error,
    trace: String,
}

impl Failure {
    /// Wrap an error returned by a worker callback.
    pub fn from_error(worker: usize, error: anyhow::Error) -> Self {
        let trace = format!("{error:?}");
        Self {
            worker,
            failed_at: Utc::now(),
            error,
            trace,
        }
    }

    /// Wrap the payload of a panic caught at the worker boundary.
    pub fn from_panic(worker: usize, payload: Box<dyn Any + Send>) -> Self {
        let message = panic_message(payload.as_ref());
        let trace = format!(
            "worker {worker} panicked: {message}\n{}",
            std::backtrace::Backtrace::capture()
        );
        Self {
            worker,
            failed_at: Utc::now(),
            error: anyhow::anyhow!("worker panicked: {message}"),
            trace,
        }
    }

    /// The original error. Use `downcast_ref` to recover a concrete type.
    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }

    pub fn into_error(self) -> anyhow::Error {
        self.error
    }

    /// Rendered cause chain (and backtrace when captured).
    pub fn trace(&self) -> &str {
        &self.trace
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker {} failed: {}", self.worker, self.error)
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
