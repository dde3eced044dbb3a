//! Pool coordinator: spawns the workers and the producer loop, runs the
//! master loop, and owns the shutdown sequence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::config::PoolSettings;
use crate::error::{Error, Result};
use crate::model::{Failure, Work};
use crate::queue::{QueueSnapshot, WorkQueue};
use crate::telemetry::metrics;
use crate::telemetry::work::{record_mode_transition, start_run_span};

use super::producer::{BonusGate, Producer, ProducerLoop, RoundResult};
use super::stop::StopSignal;
use super::worker::{WorkerContext, WorkerFn, WorkerHandle, run_worker};

/// Slack on top of one slot per worker, so a dying worker never blocks.
const FAILURE_CHANNEL_SLACK: usize = 4;

/// Runtime configuration of a pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub processes: usize,
    /// Cadence of producer polls.
    pub poll_interval: Duration,
    /// Confirmation polls before the backlog is declared exhausted.
    pub bonus_rounds: usize,
    /// Retries allowed per work item.
    pub max_retry: u32,
    /// Upper bound on how long the master loop waits for a "work needed"
    /// signal before re-checking the queue anyway.
    pub signal_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolSettings::default().into()
    }
}

impl From<PoolSettings> for PoolConfig {
    fn from(settings: PoolSettings) -> Self {
        Self {
            processes: settings.processes,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            bonus_rounds: settings.bonus_rounds,
            max_retry: settings.max_retry,
            signal_timeout: Duration::from_millis(settings.signal_timeout_ms),
        }
    }
}

/// How a bonus round ended.
enum Confirmation {
    Exhausted,
    NewWork,
}

/// A fixed-size worker pool fed by a growing backlog.
pub struct Pool {
    config: PoolConfig,
    function: WorkerFn,
    queue: Arc<WorkQueue>,
    gate: Arc<Mutex<BonusGate>>,
    stop: StopSignal,
    run_id: Uuid,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.config)
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

impl Pool {
    /// Create a pool seeded with `initial` work.
    ///
    /// `function` runs on every worker thread until it fails or the pool
    /// stops.
    pub fn new<F>(
        config: PoolConfig,
        function: F,
        initial: impl IntoIterator<Item = Work>,
    ) -> Result<Self>
    where
        F: Fn(&WorkerContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if config.processes == 0 {
            return Err(Error::Config("pool needs at least one worker".to_string()));
        }
        if config.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be non-zero".to_string()));
        }
        if config.signal_timeout.is_zero() {
            return Err(Error::Config("signal timeout must be non-zero".to_string()));
        }

        let queue = Arc::new(WorkQueue::new(initial, config.max_retry));
        let gate = Arc::new(Mutex::new(BonusGate::new(config.bonus_rounds)));

        Ok(Self {
            config,
            function: Arc::new(function),
            queue,
            gate,
            stop: StopSignal::new(),
            run_id: Uuid::new_v4(),
        })
    }

    /// The pool's queue, e.g. for inspecting [`WorkQueue::stats`].
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Run until the backlog is confirmed exhausted or a worker fails.
    ///
    /// Always stops the producer loop and joins every worker thread before
    /// returning. The first worker failure is returned as
    /// [`Error::WorkerFailed`].
    pub async fn start<P>(self, producer: P) -> Result<()>
    where
        P: Producer + 'static,
    {
        let span = start_run_span(&self.run_id, self.config.processes);
        self.run(producer).instrument(span).await
    }

    async fn run<P>(self, producer: P) -> Result<()>
    where
        P: Producer + 'static,
    {
        let started = Instant::now();
        let processes = self.config.processes;
        let (failure_tx, mut failure_rx) = mpsc::channel(processes + FAILURE_CHANNEL_SLACK);
        let (results_tx, mut results_rx) = mpsc::channel(self.config.bonus_rounds.max(1));

        info!(
            processes,
            bonus_rounds = self.config.bonus_rounds,
            max_retry = self.config.max_retry,
            "pool starting"
        );

        let producer_task = tokio::spawn(
            ProducerLoop {
                producer,
                queue: Arc::clone(&self.queue),
                gate: Arc::clone(&self.gate),
                results: results_tx,
                stop: self.stop.clone(),
                poll_interval: self.config.poll_interval,
            }
            .run()
            .in_current_span(),
        );

        let mut workers = Vec::with_capacity(processes);
        let mut outcome = Ok(());
        for worker in 0..processes {
            let handle = WorkerHandle {
                ctx: WorkerContext::new(worker, Arc::clone(&self.queue)),
                function: Arc::clone(&self.function),
                stop: self.stop.clone(),
                failures: failure_tx.clone(),
                run_id: self.run_id,
            };
            let spawned = std::thread::Builder::new()
                .name(format!("workq-worker-{worker}"))
                .spawn(move || run_worker(handle));
            match spawned {
                Ok(thread) => workers.push(thread),
                Err(e) => {
                    outcome = Err(Error::Spawn(e));
                    break;
                }
            }
        }
        drop(failure_tx);

        if outcome.is_ok() {
            outcome = self.supervise(&mut failure_rx, &mut results_rx).await;
        }

        // Shutdown. The stop flag goes first: workers check it before parking.
        self.stop.set();
        self.queue.close();
        let pending = drain_failures(&mut failure_rx);

        let joined = workers.len();
        let join = tokio::task::spawn_blocking(move || {
            for thread in workers {
                if thread.join().is_err() {
                    error!("worker thread panicked outside its callback");
                }
            }
        })
        .await;
        if let Err(e) = join {
            error!(error = %e, "failed to join worker threads");
        }
        debug!(joined, "worker threads joined");

        let late = drain_failures(&mut failure_rx);
        drop(results_rx);
        if let Err(e) = producer_task.await {
            error!(error = %e, "producer task ended abnormally");
        }

        let outcome = match outcome {
            Err(e @ Error::WorkerFailed(_)) => Err(e),
            other => match pending.or(late) {
                Some(failure) => Err(Error::WorkerFailed(Box::new(failure))),
                None => other,
            },
        };

        let stats = self.queue.stats();
        let duration_ms = started.elapsed().as_millis() as u64;
        metrics::run_duration_ms().record(duration_ms as f64, &[]);
        match &outcome {
            Ok(()) => info!(
                delivered = stats.delivered,
                retried = stats.retried,
                superseded = stats.superseded,
                duration_ms,
                "pool finished, backlog exhausted"
            ),
            Err(e) => error!(error = %e, delivered = stats.delivered, duration_ms, "pool aborted"),
        }
        outcome
    }

    /// Master loop. Returns once a bonus round confirms the backlog is
    /// exhausted, or with the first worker failure.
    async fn supervise(
        &self,
        failures: &mut mpsc::Receiver<Failure>,
        results: &mut mpsc::Receiver<RoundResult>,
    ) -> Result<()> {
        loop {
            self.queue.wait_for_signal(self.config.signal_timeout).await;

            if let Some(failure) = drain_failures(failures) {
                return Err(Error::WorkerFailed(Box::new(failure)));
            }

            let snapshot = {
                let mut gate = self.gate.lock().await;
                let snapshot = self.queue.snapshot();
                if !self.is_drained(&snapshot) {
                    continue;
                }
                if gate.rounds() > 0 {
                    gate.arm();
                }
                snapshot
            };

            let span = tracing::Span::current();
            record_mode_transition(&span, "normal", "bonus");
            let confirmation = self.confirm(results).await?;
            record_mode_transition(&span, "bonus", "normal");

            match confirmation {
                Confirmation::NewWork => continue,
                Confirmation::Exhausted => {
                    let found = self.queue.snapshot().version;
                    if found != snapshot.version {
                        return Err(Error::VersionDrift {
                            expected: snapshot.version,
                            found,
                        });
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Every worker parked and nothing live pending.
    fn is_drained(&self, snapshot: &QueueSnapshot) -> bool {
        snapshot.is_empty && snapshot.idle == self.config.processes
    }

    /// Follow an armed bonus round to its end.
    async fn confirm(&self, results: &mut mpsc::Receiver<RoundResult>) -> Result<Confirmation> {
        let rounds = self.config.bonus_rounds;
        debug!(rounds, "queue drained, starting bonus round");

        for _ in 0..rounds {
            let result = results.recv().await.ok_or(Error::ProducerGone)?;
            if result.added {
                info!(round = result.round, "bonus round found new work");
                return Ok(Confirmation::NewWork);
            }
        }

        info!(rounds, "bonus round came back empty");
        Ok(Confirmation::Exhausted)
    }
}

/// Non-blocking drain of the failure channel. Keeps the first failure and
/// logs the rest.
fn drain_failures(failures: &mut mpsc::Receiver<Failure>) -> Option<Failure> {
    let mut first = None;
    while let Ok(failure) = failures.try_recv() {
        if first.is_none() {
            first = Some(failure);
        } else {
            warn!(worker = failure.worker, error = %failure.error(), "additional worker failure");
        }
    }
    first
}
