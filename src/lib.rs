//! # workq
//!
//! A crash-aware worker pool for an open-ended backlog.
//!
//! Work arrives from an external producer while the pool runs. Only the
//! newest work per owner is delivered, items can be retried a bounded number
//! of times, and the pool stops only after a confirmatory "bonus round" of
//! producer polls comes back empty. A failing worker aborts the whole run and
//! its error is returned from [`engine::Pool::start`].

pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod hook;
pub mod model;
pub mod queue;
pub mod telemetry;

pub use engine::{Pool, PoolConfig, Producer, WorkerContext};
pub use error::{Error, Result};
pub use model::{Failure, Work};
pub use queue::WorkQueue;
