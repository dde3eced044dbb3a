//! Worker loop: one dedicated thread per worker, fail-fast on any error.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::Result;
use crate::model::{Failure, Work};
use crate::queue::WorkQueue;
use crate::telemetry::{metrics, work::start_worker_span};

use super::stop::StopSignal;

/// The per-worker callback. Invoked repeatedly until it fails or the pool
/// stops; each call is expected to pull and handle one item.
pub type WorkerFn = Arc<dyn Fn(&WorkerContext) -> anyhow::Result<()> + Send + Sync>;

/// Callbacks bound to the pool's queue, handed to the worker function.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    worker: usize,
    queue: Arc<WorkQueue>,
}

impl WorkerContext {
    pub(crate) fn new(worker: usize, queue: Arc<WorkQueue>) -> Self {
        Self { worker, queue }
    }

    /// Index of this worker, `0..processes`.
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Blocking pull of the next live item. `None` means the pool is
    /// shutting down.
    pub fn get_work(&self) -> Option<Work> {
        self.queue.consume()
    }

    /// Ask for `work` to be delivered again, up to the configured limit.
    pub fn retry_work(&self, work: Work) -> Result<()> {
        self.queue.retry(work)
    }
}

/// Everything a worker thread needs, moved in at spawn.
pub(crate) struct WorkerHandle {
    pub ctx: WorkerContext,
    pub function: WorkerFn,
    pub stop: StopSignal,
    pub failures: mpsc::Sender<Failure>,
    pub run_id: uuid::Uuid,
}

/// Body of a worker thread.
///
/// Runs the callback until the stop flag is set. On the first error or
/// panic, the failure is posted to the coordinator and the worker exits.
pub(crate) fn run_worker(handle: WorkerHandle) {
    let WorkerHandle {
        ctx,
        function,
        stop,
        failures,
        run_id,
    } = handle;
    let span = start_worker_span(&run_id, ctx.worker);
    let _enter = span.enter();
    debug!("worker started");

    while !stop.is_set() {
        let failure = match catch_unwind(AssertUnwindSafe(|| function(&ctx))) {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => Failure::from_error(ctx.worker, e),
            Err(payload) => Failure::from_panic(ctx.worker, payload),
        };

        error!(error = %failure.error(), "worker failed, aborting run");
        metrics::worker_failures().add(1, &[]);
        // Capacity covers every worker plus slack; a full channel means a
        // failure is already pending, which is enough to abort the run.
        let _ = failures.try_send(failure);
        ctx.queue.signal_work_needed();
        return;
    }

    debug!("worker stopped");
}
