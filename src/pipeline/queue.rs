//! Bounded FIFO connecting adjacent stages.
//!
//! All state lives behind one mutex. The condition variable is only waited on
//! and signalled under [`BackpressurePolicy::Block`]; the drop policies never
//! wake anyone. Dequeue never blocks.
//!
//! Lock poisoning is recovered rather than propagated: every mutation of the
//! state completes before its guard is released, so a panic elsewhere while
//! holding the lock cannot leave the deque or the counters half-updated.

use crate::pipeline::frame::Frame;
use crate::types::BackpressurePolicy;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;

/// Why an enqueue did not insert its item.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue full, item dropped")]
    Full,
    #[error("queue shut down")]
    Shutdown,
}

/// Counter snapshot. All values are monotonic for the queue's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub total_dropped: u64,
    pub total_blocked_ns: u64,
}

struct QueueState<T> {
    items: VecDeque<T>,
    shutdown: bool,
    stats: QueueStats,
}

/// Thread-safe bounded queue with a fixed backpressure policy.
pub struct BoundedQueue<T = Frame> {
    capacity: usize,
    policy: BackpressurePolicy,
    state: Mutex<QueueState<T>>,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            policy,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                shutdown: false,
                stats: QueueStats::default(),
            }),
            not_full: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `item`, applying the backpressure policy if the queue is full.
    ///
    /// `DropLatest` returns [`QueueError::Full`] and discards `item`.
    /// `DropOldest` evicts the front and always succeeds. `Block` waits for
    /// space and returns [`QueueError::Shutdown`] if the queue was shut down
    /// before or during the wait.
    pub fn enqueue(&self, item: T) -> Result<(), QueueError> {
        let mut state = self.lock();

        if self.policy == BackpressurePolicy::Block && state.shutdown {
            return Err(QueueError::Shutdown);
        }

        if state.items.len() >= self.capacity {
            match self.policy {
                BackpressurePolicy::DropLatest => {
                    state.stats.total_dropped += 1;
                    return Err(QueueError::Full);
                }
                BackpressurePolicy::DropOldest => {
                    // Evicted item is released once the lock is dropped.
                    let evicted = state.items.pop_front();
                    state.stats.total_dropped += 1;
                    state.items.push_back(item);
                    state.stats.total_enqueued += 1;
                    drop(state);
                    drop(evicted);
                    return Ok(());
                }
                BackpressurePolicy::Block => {
                    let started = Instant::now();
                    let capacity = self.capacity;
                    state = self
                        .not_full
                        .wait_while(state, |s| s.items.len() >= capacity && !s.shutdown)
                        .unwrap_or_else(PoisonError::into_inner);
                    state.stats.total_blocked_ns += started.elapsed().as_nanos() as u64;
                    if state.shutdown {
                        return Err(QueueError::Shutdown);
                    }
                }
            }
        }

        state.items.push_back(item);
        state.stats.total_enqueued += 1;
        Ok(())
    }

    /// Pop the front item without blocking.
    pub fn dequeue(&self) -> Option<T> {
        let mut state = self.lock();
        let item = state.items.pop_front();
        if item.is_some() && self.policy == BackpressurePolicy::Block {
            self.not_full.notify_one();
        }
        item
    }

    /// Drain everything currently queued and return only the newest item.
    pub fn dequeue_latest(&self) -> Option<T> {
        let mut state = self.lock();
        let latest = state.items.pop_back();
        let stale: Vec<T> = state.items.drain(..).collect();
        if latest.is_some() && self.policy == BackpressurePolicy::Block {
            self.not_full.notify_all();
        }
        drop(state);
        drop(stale);
        latest
    }

    /// Wake every blocked producer; `Block` enqueues fail from now on.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.not_full.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().items.len() >= self.capacity
    }

    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    pub fn stats(&self) -> QueueStats {
        self.lock().stats
    }

    pub fn total_enqueued(&self) -> u64 {
        self.lock().stats.total_enqueued
    }

    pub fn total_dropped(&self) -> u64 {
        self.lock().stats.total_dropped
    }

    pub fn total_blocked_ns(&self) -> u64 {
        self.lock().stats.total_blocked_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let q = BoundedQueue::new(4, BackpressurePolicy::DropLatest);
        for i in 0..3 {
            q.enqueue(i).unwrap();
        }
        assert_eq!(q.dequeue(), Some(0));
        assert_eq!(q.dequeue(), Some(1));
        assert_eq!(q.dequeue(), Some(2));
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn test_zero_capacity_coerced() {
        let q: BoundedQueue<u8> = BoundedQueue::new(0, BackpressurePolicy::DropOldest);
        assert_eq!(q.capacity(), 1);
    }

    #[test]
    fn test_drop_latest_rejects_incoming() {
        let q = BoundedQueue::new(2, BackpressurePolicy::DropLatest);
        q.enqueue(1).unwrap();
        q.enqueue(2).unwrap();
        assert_eq!(q.enqueue(3), Err(QueueError::Full));
        assert_eq!(q.total_dropped(), 1);
        assert_eq!(q.total_enqueued(), 2);
        assert_eq!(q.dequeue(), Some(1));
        assert_eq!(q.dequeue(), Some(2));
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let q = BoundedQueue::new(3, BackpressurePolicy::DropOldest);
        for i in 0..4 {
            q.enqueue(i).unwrap();
        }
        assert_eq!(q.total_dropped(), 1);
        let drained: Vec<_> = std::iter::from_fn(|| q.dequeue()).collect();
        assert_eq!(drained, vec![1, 2, 3]);
    }

    #[test]
    fn test_dequeue_latest_drains() {
        let q = BoundedQueue::new(8, BackpressurePolicy::DropOldest);
        for i in 0..5 {
            q.enqueue(i).unwrap();
        }
        assert_eq!(q.dequeue_latest(), Some(4));
        assert!(q.is_empty());
        assert_eq!(q.dequeue_latest(), None);
    }

    #[test]
    fn test_block_unblocks_on_dequeue() {
        let q = Arc::new(BoundedQueue::new(1, BackpressurePolicy::Block));
        q.enqueue(1).unwrap();

        let producer = {
            let q = q.clone();
            thread::spawn(move || q.enqueue(2))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(q.dequeue(), Some(1));

        assert_eq!(producer.join().unwrap(), Ok(()));
        assert_eq!(q.dequeue(), Some(2));
        assert!(q.total_blocked_ns() > 0);
    }

    #[test]
    fn test_block_unblocks_on_shutdown() {
        let q = Arc::new(BoundedQueue::new(1, BackpressurePolicy::Block));
        q.enqueue(1).unwrap();

        let producer = {
            let q = q.clone();
            thread::spawn(move || q.enqueue(2))
        };
        thread::sleep(Duration::from_millis(20));
        q.shutdown();

        assert_eq!(producer.join().unwrap(), Err(QueueError::Shutdown));
        assert!(q.total_blocked_ns() > 0);
        // Fails immediately now, even with space available.
        assert_eq!(q.dequeue(), Some(1));
        assert_eq!(q.enqueue(3), Err(QueueError::Shutdown));
    }

    #[test]
    fn test_shutdown_idempotent() {
        let q: BoundedQueue<u8> = BoundedQueue::new(2, BackpressurePolicy::Block);
        q.shutdown();
        q.shutdown();
        assert!(q.is_shutdown());
    }

    #[test]
    fn test_fill_ratio() {
        let q = BoundedQueue::new(4, BackpressurePolicy::DropLatest);
        q.enqueue(0).unwrap();
        assert!((q.fill_ratio() - 0.25).abs() < f64::EPSILON);
        q.enqueue(0).unwrap();
        q.enqueue(0).unwrap();
        q.enqueue(0).unwrap();
        assert!(q.is_full());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue(u32),
        Dequeue,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![any::<u32>().prop_map(Op::Enqueue), Just(Op::Dequeue)]
    }

    fn policy_strategy() -> impl Strategy<Value = BackpressurePolicy> {
        prop_oneof![
            Just(BackpressurePolicy::DropLatest),
            Just(BackpressurePolicy::DropOldest),
            Just(BackpressurePolicy::Block),
        ]
    }

    proptest! {
        #[test]
        fn prop_len_never_exceeds_capacity(
            capacity in 1usize..16,
            policy in policy_strategy(),
            ops in prop::collection::vec(op_strategy(), 0..200),
        ) {
            let q = BoundedQueue::new(capacity, policy);
            let mut last_dropped = 0;
            for op in ops {
                match op {
                    // Block would park this thread on a full queue.
                    Op::Enqueue(_) if policy == BackpressurePolicy::Block && q.is_full() => {}
                    Op::Enqueue(v) => { let _ = q.enqueue(v); }
                    Op::Dequeue => { let _ = q.dequeue(); }
                }
                prop_assert!(q.len() <= q.capacity());
                let dropped = q.total_dropped();
                prop_assert!(dropped >= last_dropped);
                last_dropped = dropped;
            }
        }

        #[test]
        fn prop_block_producer_respects_capacity(capacity in 1usize..8, count in 1usize..64) {
            let q = Arc::new(BoundedQueue::new(capacity, BackpressurePolicy::Block));
            let producer = {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..count {
                        q.enqueue(i).unwrap();
                    }
                })
            };

            let mut received = Vec::with_capacity(count);
            while received.len() < count {
                prop_assert!(q.len() <= q.capacity());
                match q.dequeue() {
                    Some(v) => received.push(v),
                    None => thread::yield_now(),
                }
            }
            producer.join().unwrap();
            prop_assert_eq!(received, (0..count).collect::<Vec<_>>());
            prop_assert_eq!(q.total_dropped(), 0);
        }

        #[test]
        fn prop_drop_oldest_keeps_last_capacity(capacity in 1usize..32) {
            let q = BoundedQueue::new(capacity, BackpressurePolicy::DropOldest);
            for i in 0..=capacity {
                q.enqueue(i).unwrap();
            }
            let drained: Vec<_> = std::iter::from_fn(|| q.dequeue()).collect();
            let expected: Vec<_> = (1..=capacity).collect();
            prop_assert_eq!(drained, expected);
            prop_assert_eq!(q.total_dropped(), 1);
        }
    }
}
