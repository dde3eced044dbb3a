//! Integration tests for the work queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use workq::model::Work;
use workq::queue::WorkQueue;
use workq::Error;

fn drain(queue: &WorkQueue) -> Vec<Work> {
    let mut out = Vec::new();
    while !queue.snapshot().is_empty {
        out.extend(queue.consume());
    }
    out
}

// ---------------------------------------------------------------------------
// Acceptance and staleness
// ---------------------------------------------------------------------------

#[test]
fn result_id_is_accepted_only_once() {
    let queue = WorkQueue::new([], 2);

    assert!(queue.enqueue_all([Work::new(1, 9)]));
    assert!(!queue.enqueue_all([Work::new(1, 9)]));
    // Same id under another owner is still a duplicate.
    assert!(!queue.enqueue_all([Work::new(1, 10)]));

    assert_eq!(drain(&queue), vec![Work::new(1, 9)]);
    assert_eq!(queue.stats().accepted, 1);
}

#[test]
fn re_submitting_consumed_work_is_ignored() {
    let queue = WorkQueue::new([Work::new(5, 1)], 2);
    assert_eq!(queue.consume(), Some(Work::new(5, 1)));

    let version = queue.snapshot().version;
    assert!(!queue.enqueue_all([Work::new(5, 1)]));
    assert_eq!(queue.snapshot().version, version);
    assert!(queue.snapshot().is_empty);
}

#[test]
fn superseded_work_is_never_delivered() {
    let queue = WorkQueue::new([], 2);
    queue.enqueue_all([Work::new(1, 9)]);
    queue.enqueue_all([Work::new(2, 9)]);

    assert_eq!(drain(&queue), vec![Work::new(2, 9)]);
    assert_eq!(queue.stats().superseded, 1);
}

#[test]
fn live_items_keep_fifo_order() {
    let queue = WorkQueue::new(
        [
            Work::new(1, 1),
            Work::new(2, 2),
            Work::new(3, 1),
            Work::new(4, 3),
        ],
        2,
    );

    assert_eq!(
        drain(&queue),
        vec![Work::new(2, 2), Work::new(3, 1), Work::new(4, 3)]
    );
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[test]
fn stale_retry_is_dropped() {
    let queue = WorkQueue::new([Work::new(1, 9)], 2);
    let first = queue.consume().unwrap();

    queue.enqueue_all([Work::new(2, 9)]);
    queue.retry(first).unwrap();

    assert_eq!(drain(&queue), vec![Work::new(2, 9)]);
}

#[test]
fn retry_is_bounded_by_max_retry() {
    let queue = WorkQueue::new([Work::new(1, 9)], 2);
    let mut deliveries = 0;

    while !queue.snapshot().is_empty {
        let work = queue.consume().unwrap();
        deliveries += 1;
        queue.retry(work).unwrap();
    }

    assert_eq!(deliveries, 3);
    let stats = queue.stats();
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.retries_exhausted, 1);
}

#[test]
fn retried_item_goes_behind_pending_items() {
    let queue = WorkQueue::new([Work::new(1, 1), Work::new(2, 2)], 2);
    let first = queue.consume().unwrap();
    queue.retry(first).unwrap();
    queue.enqueue_all([Work::new(3, 3)]);

    assert_eq!(
        drain(&queue),
        vec![Work::new(2, 2), Work::new(1, 1), Work::new(3, 3)]
    );
}

#[test]
fn retry_of_unknown_work_is_rejected() {
    let queue = WorkQueue::new([], 2);
    let err = queue.retry(Work::new(42, 1)).unwrap_err();
    assert!(matches!(err, Error::UnknownWork(w) if w == Work::new(42, 1)));
}

#[test]
fn zero_max_retry_never_requeues() {
    let queue = WorkQueue::new([Work::new(1, 1)], 0);
    let work = queue.consume().unwrap();
    let version = queue.snapshot().version;

    queue.retry(work).unwrap();
    assert_eq!(queue.snapshot().version, version);
    assert!(queue.snapshot().is_empty);
}

// ---------------------------------------------------------------------------
// Versioning
// ---------------------------------------------------------------------------

#[test]
fn version_moves_on_every_mutation() {
    let queue = WorkQueue::new([], 2);
    let v0 = queue.snapshot().version;

    queue.enqueue_all([Work::new(1, 1)]);
    let v1 = queue.snapshot().version;
    assert!(v1 > v0);

    let work = queue.consume().unwrap();
    let v2 = queue.snapshot().version;
    assert!(v2 > v1);

    queue.retry(work).unwrap();
    let v3 = queue.snapshot().version;
    assert!(v3 > v2);

    queue.enqueue_all(Vec::new());
    assert_eq!(queue.snapshot().version, v3);
}

// ---------------------------------------------------------------------------
// Blocking, idle accounting and close
// ---------------------------------------------------------------------------

fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached in time");
}

#[test]
fn blocked_consumer_is_counted_idle_and_woken_by_enqueue() {
    let queue = Arc::new(WorkQueue::new([], 2));

    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.consume())
    };

    wait_until(|| queue.snapshot().idle == 1);
    queue.enqueue_all([Work::new(7, 3)]);

    assert_eq!(consumer.join().unwrap(), Some(Work::new(7, 3)));
    assert_eq!(queue.snapshot().idle, 0);
}

#[test]
fn close_unblocks_every_consumer() {
    let queue = Arc::new(WorkQueue::new([], 2));

    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.consume())
        })
        .collect();

    wait_until(|| queue.snapshot().idle == 3);
    queue.close();

    for consumer in consumers {
        assert_eq!(consumer.join().unwrap(), None);
    }
    assert_eq!(queue.snapshot().idle, 0);
}

#[test]
fn close_is_idempotent() {
    let queue = Arc::new(WorkQueue::new([], 2));
    let returned = Arc::new(AtomicBool::new(false));

    let consumer = {
        let queue = Arc::clone(&queue);
        let returned = Arc::clone(&returned);
        thread::spawn(move || {
            let got = queue.consume();
            returned.store(true, Ordering::SeqCst);
            got
        })
    };

    wait_until(|| queue.snapshot().idle == 1);
    queue.close();
    queue.close();

    assert_eq!(consumer.join().unwrap(), None);
    assert!(returned.load(Ordering::SeqCst));
    assert!(queue.is_closed());
    assert_eq!(queue.snapshot().idle, 0);
    assert_eq!(queue.consume(), None);
}

#[test]
fn closed_queue_still_hands_out_live_work() {
    let queue = WorkQueue::new([Work::new(1, 1), Work::new(2, 5), Work::new(3, 5)], 2);
    queue.close();

    assert_eq!(queue.consume(), Some(Work::new(1, 1)));
    assert_eq!(queue.consume(), Some(Work::new(3, 5)));
    assert_eq!(queue.consume(), None);
    assert_eq!(queue.snapshot().idle, 0);
}

#[tokio::test]
async fn waiting_consumer_raises_work_needed_signal() {
    let queue = Arc::new(WorkQueue::new([], 2));
    assert!(!queue.wait_for_signal(Duration::from_millis(20)).await);

    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.consume())
    };

    assert!(queue.wait_for_signal(Duration::from_secs(5)).await);
    queue.close();
    assert!(queue.wait_for_signal(Duration::from_secs(5)).await);
    assert_eq!(consumer.join().unwrap(), None);

    // Closing again posts nothing new.
    queue.close();
    assert!(!queue.wait_for_signal(Duration::from_millis(20)).await);
}
