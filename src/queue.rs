//! Shared work queue.
//!
//! The single owner of all pending work. Workers and the coordinator reach
//! it only through the operations below; every mutation happens under one
//! lock. Consumers park on a condition variable tied to that lock, while
//! the coordinator listens on a separate counting "work needed" signal.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::sync::Semaphore;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::model::Work;
use crate::telemetry::metrics;

/// Point-in-time view used by the coordinator to decide on a bonus round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub version: u64,
    /// No live item is pending.
    pub is_empty: bool,
    /// Workers currently parked in [`WorkQueue::consume`].
    pub idle: usize,
}

/// Cumulative counters over the queue's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub accepted: u64,
    pub delivered: u64,
    pub superseded: u64,
    pub retried: u64,
    pub retries_exhausted: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Work>,
    /// Every result id ever accepted through `enqueue_all`.
    seen: HashSet<i64>,
    newest: HashMap<i64, i64>,
    retries: HashMap<Work, u32>,
    version: u64,
    idle: usize,
    closed: bool,
    stats: QueueStats,
}

impl QueueState {
    /// Drop superseded items from the head and return the first live one.
    fn peek_live(&mut self) -> Option<Work> {
        while let Some(&head) = self.pending.front() {
            if self.newest.get(&head.owner_id) == Some(&head.result_id) {
                return Some(head);
            }
            self.pending.pop_front();
            self.stats.superseded += 1;
            metrics::work_superseded().add(1, &[]);
            trace!(work = %head, "dropped superseded work");
        }
        None
    }
}

/// Mutex-protected queue shared by the producer, the workers and the
/// coordinator.
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    work_needed: Semaphore,
    max_retry: u32,
}

impl WorkQueue {
    /// Create a queue seeded with `initial` work.
    pub fn new(initial: impl IntoIterator<Item = Work>, max_retry: u32) -> Self {
        let queue = Self {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            work_needed: Semaphore::new(0),
            max_retry,
        };
        queue.enqueue_all(initial);
        queue
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // No queue operation panics while holding the lock, so a poisoned
        // state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept every item whose result id has not been seen before.
    ///
    /// Returns whether anything was added. Already-seen ids are ignored.
    pub fn enqueue_all(&self, items: impl IntoIterator<Item = Work>) -> bool {
        let mut state = self.lock();
        let mut added = 0u64;

        for work in items {
            if !state.seen.insert(work.result_id) {
                continue;
            }
            state.pending.push_back(work);
            if let Some(previous) = state.newest.insert(work.owner_id, work.result_id) {
                // The superseded item is never delivered again.
                state.retries.remove(&Work::new(previous, work.owner_id));
            }
            added += 1;
        }

        if added == 0 {
            return false;
        }

        state.version += 1;
        state.stats.accepted += added;
        let version = state.version;
        drop(state);

        metrics::work_enqueued().add(added, &[]);
        debug!(added, version, "work enqueued");
        self.available.notify_all();
        true
    }

    /// Re-append `work` at the tail unless it has used up its retries.
    ///
    /// Does not touch the owner's newest pointer: a retried item that has
    /// since been superseded is pruned on the next peek.
    pub fn retry(&self, work: Work) -> Result<()> {
        let mut state = self.lock();
        if !state.seen.contains(&work.result_id) {
            return Err(Error::UnknownWork(work));
        }

        let attempt = if state.newest.get(&work.owner_id) == Some(&work.result_id) {
            let count = state.retries.entry(work).or_insert(0);
            if *count >= self.max_retry {
                state.stats.retries_exhausted += 1;
                drop(state);
                metrics::work_retried().add(1, &[KeyValue::new("result", "exhausted")]);
                debug!(%work, max_retry = self.max_retry, "retry limit reached, dropping");
                return Ok(());
            }
            *count += 1;
            *count
        } else {
            // Superseded: no counter, the next peek prunes it.
            0
        };

        state.pending.push_back(work);
        state.version += 1;
        state.stats.retried += 1;
        drop(state);

        metrics::work_retried().add(1, &[KeyValue::new("result", "requeued")]);
        debug!(%work, attempt, "work requeued");
        self.available.notify_one();
        Ok(())
    }

    /// Take the next live item, blocking while the queue is open and
    /// nothing live is pending.
    ///
    /// Returns `None` once the queue is closed and holds no live item.
    pub fn consume(&self) -> Option<Work> {
        let mut state = self.lock();
        let mut parked = false;

        let result = loop {
            if let Some(work) = state.peek_live() {
                state.pending.pop_front();
                state.version += 1;
                state.stats.delivered += 1;
                break Some(work);
            }
            if state.closed {
                break None;
            }
            if !parked {
                parked = true;
                state.idle += 1;
                self.signal_work_needed();
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        };

        if parked {
            state.idle -= 1;
        }
        drop(state);

        if let Some(work) = result {
            metrics::work_delivered().add(1, &[]);
            trace!(%work, "work delivered");
        }
        result
    }

    /// Close the queue and wake every parked consumer. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);

        self.available.notify_all();
        self.signal_work_needed();
        debug!("queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Version, emptiness and idle count read under the lock.
    ///
    /// Pruning superseded heads as a side effect is intended.
    pub fn snapshot(&self) -> QueueSnapshot {
        let mut state = self.lock();
        let is_empty = state.peek_live().is_none();
        QueueSnapshot {
            version: state.version,
            is_empty,
            idle: state.idle,
        }
    }

    pub fn stats(&self) -> QueueStats {
        self.lock().stats
    }

    /// Raise one "work needed" signal for the coordinator.
    pub fn signal_work_needed(&self) {
        self.work_needed.add_permits(1);
    }

    /// Wait up to `timeout` for the next "work needed" signal.
    ///
    /// Returns `false` on timeout.
    pub async fn wait_for_signal(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.work_needed.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                true
            }
            _ => false,
        }
    }
}
