//! Producer loop and the bonus-round gate.
//!
//! The producer loop polls an external [`Producer`] for new work at a fixed
//! interval. Every call happens while holding the [`BonusGate`] lock, which
//! the master loop also takes when deciding whether the pool looks drained.
//! While a bonus round is armed, each call is reported back to the master
//! loop over a bounded channel, and the last call of a round is flagged
//! final so the producer can consult its source of truth.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt as _;
use opentelemetry::KeyValue;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::model::{Work, panic_message};
use crate::queue::WorkQueue;
use crate::telemetry::metrics;

use super::stop::StopSignal;

/// Source of new work, polled repeatedly by the pool.
///
/// Errors are logged and the call is retried after one poll interval; they
/// never abort the run.
#[async_trait]
pub trait Producer: Send {
    /// Return work that appeared since the last call (or an empty vec).
    ///
    /// `final_call` marks the last confirmation attempt of a bonus round.
    async fn produce(&mut self, final_call: bool) -> anyhow::Result<Vec<Work>>;
}

#[async_trait]
impl<F> Producer for F
where
    F: FnMut(bool) -> anyhow::Result<Vec<Work>> + Send,
{
    async fn produce(&mut self, final_call: bool) -> anyhow::Result<Vec<Work>> {
        let produce = &mut *self;
        produce(final_call)
    }
}

/// Bonus-round state machine guarded by the producer-exclusion lock.
///
/// `round == None` is normal polling; `Some(k)` means the next producer call
/// is confirmation attempt `k` of `rounds`.
#[derive(Debug)]
pub(crate) struct BonusGate {
    round: Option<usize>,
    rounds: usize,
}

/// What a producer call inside a bonus round reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RoundResult {
    pub round: usize,
    pub added: bool,
}

impl BonusGate {
    pub(crate) fn new(rounds: usize) -> Self {
        Self { round: None, rounds }
    }

    pub(crate) fn rounds(&self) -> usize {
        self.rounds
    }

    /// Switch from normal polling to a confirmation round.
    pub(crate) fn arm(&mut self) {
        self.round = Some(0);
    }

    /// Whether the next call is the final attempt of the round.
    fn final_call(&self) -> bool {
        matches!(self.round, Some(k) if k + 1 == self.rounds)
    }

    /// Advance after a successful producer call. New work, or the last
    /// attempt, returns the gate to normal polling.
    fn advance(&mut self, added: bool) -> Option<RoundResult> {
        let round = self.round?;
        self.round = if added || round + 1 >= self.rounds {
            None
        } else {
            Some(round + 1)
        };
        Some(RoundResult { round, added })
    }
}

pub(crate) struct ProducerLoop<P> {
    pub producer: P,
    pub queue: Arc<WorkQueue>,
    pub gate: Arc<Mutex<BonusGate>>,
    pub results: mpsc::Sender<RoundResult>,
    pub stop: StopSignal,
    pub poll_interval: Duration,
}

impl<P: Producer> ProducerLoop<P> {
    /// Poll until the stop flag is set.
    pub(crate) async fn run(mut self) {
        debug!(poll_interval_ms = self.poll_interval.as_millis() as u64, "producer loop started");

        while !self.stop.is_set() {
            if let Some(result) = self.poll_once().await {
                // Sent after the gate is released.
                if self.results.send(result).await.is_err() {
                    break;
                }
            }

            tokio::select! {
                _ = self.stop.stopped() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        debug!("producer loop stopped");
    }

    /// One producer call under the gate. Returns the round report when a
    /// bonus round is armed and the call succeeded.
    async fn poll_once(&mut self) -> Option<RoundResult> {
        let mut gate = self.gate.lock().await;
        let final_call = gate.final_call();

        let outcome = AssertUnwindSafe(self.producer.produce(final_call))
            .catch_unwind()
            .await;

        let items = match outcome {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                metrics::producer_errors().add(1, &[]);
                warn!(error = %e, final_call, "producer failed, retrying next interval");
                return None;
            }
            Err(payload) => {
                metrics::producer_errors().add(1, &[]);
                warn!(
                    panic = %panic_message(payload.as_ref()),
                    final_call,
                    "producer panicked, retrying next interval"
                );
                return None;
            }
        };

        let count = items.len();
        let added = self.queue.enqueue_all(items);
        let result = gate.advance(added);

        if let Some(RoundResult { round, added }) = result {
            let outcome = if added { "new_work" } else { "empty" };
            metrics::bonus_rounds().add(1, &[KeyValue::new("outcome", outcome)]);
            info!(round, final_call, added, "bonus round call finished");
        } else if added {
            debug!(offered = count, "producer supplied new work");
        }
        result
    }
}
