//! Backpressure and frame ownership across bounded queues
//!
//! Exercises the queue policies with real frames and threads: borrowed
//! frames evicted by a policy must release their memory exactly once, and
//! blocked producers must wake within a short grace period.

mod common;

use common::builders::FrameBuilder;
use scope_pipeline::pipeline::{BoundedQueue, Frame, Ownership, QueueError};
use scope_pipeline::BackpressurePolicy;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Leak a buffer and hand out a borrowed frame whose release reclaims it.
fn borrowed_frame(sequence: u64, releases: &Arc<AtomicUsize>) -> Frame {
    let data: Box<[i16]> = vec![sequence as i16; 8].into_boxed_slice();
    let len = data.len();
    let raw = Box::into_raw(data) as *mut i16;
    let ptr = NonNull::new(raw).unwrap();
    let addr = raw as usize;
    let releases = releases.clone();
    let release = move || {
        let slice = std::ptr::slice_from_raw_parts_mut(addr as *mut i16, len);
        // SAFETY: the slice came from Box::into_raw above and is reclaimed once.
        drop(unsafe { Box::from_raw(slice) });
        releases.fetch_add(1, Ordering::SeqCst);
    };
    // SAFETY: the buffer stays alive until `release` runs.
    let mut frame = unsafe { Frame::from_borrowed(1, 8, ptr, release) };
    frame.sequence = sequence;
    frame
}

#[test]
fn test_drop_oldest_releases_evicted_borrowed_frames() {
    let releases = Arc::new(AtomicUsize::new(0));
    let q = BoundedQueue::new(4, BackpressurePolicy::DropOldest);

    for seq in 0..5 {
        q.enqueue(borrowed_frame(seq, &releases)).unwrap();
    }
    assert_eq!(q.total_dropped(), 1);
    assert_eq!(releases.load(Ordering::SeqCst), 1);

    let drained: Vec<Frame> = std::iter::from_fn(|| q.dequeue()).collect();
    assert_eq!(
        drained.iter().map(|f| f.sequence).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert!(drained.iter().all(|f| f.ownership() == Ownership::Borrowed));
    assert_eq!(drained[3].samples(), &[4; 8]);
    assert_eq!(releases.load(Ordering::SeqCst), 1);

    drop(drained);
    assert_eq!(releases.load(Ordering::SeqCst), 5);
}

#[test]
fn test_drop_latest_releases_rejected_frame() {
    let releases = Arc::new(AtomicUsize::new(0));
    let q = BoundedQueue::new(1, BackpressurePolicy::DropLatest);

    q.enqueue(borrowed_frame(0, &releases)).unwrap();
    assert_eq!(q.enqueue(borrowed_frame(1, &releases)), Err(QueueError::Full));
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert_eq!(q.dequeue().map(|f| f.sequence), Some(0));
    assert_eq!(releases.load(Ordering::SeqCst), 2);
}

#[test]
fn test_dequeue_latest_releases_stale_frames() {
    let releases = Arc::new(AtomicUsize::new(0));
    let q = BoundedQueue::new(8, BackpressurePolicy::DropOldest);
    for seq in 0..6 {
        q.enqueue(borrowed_frame(seq, &releases)).unwrap();
    }

    let latest = q.dequeue_latest().unwrap();
    assert_eq!(latest.sequence, 5);
    assert_eq!(releases.load(Ordering::SeqCst), 5);

    let owned = latest.into_owned();
    assert_eq!(owned.ownership(), Ownership::Owned);
    assert_eq!(releases.load(Ordering::SeqCst), 6);
    assert_eq!(owned.samples(), &[5; 8]);
}

#[test]
fn test_blocked_producer_wakes_within_grace_period() {
    let q = Arc::new(BoundedQueue::new(2, BackpressurePolicy::Block));
    q.enqueue(FrameBuilder::new(1, 4).sequence(0).build()).unwrap();
    q.enqueue(FrameBuilder::new(1, 4).sequence(1).build()).unwrap();

    let producer = {
        let q = q.clone();
        thread::spawn(move || {
            let result = q.enqueue(FrameBuilder::new(1, 4).sequence(2).build());
            (result, Instant::now())
        })
    };
    thread::sleep(Duration::from_millis(30));

    let freed_at = Instant::now();
    assert_eq!(q.dequeue().map(|f| f.sequence), Some(0));
    let (result, woke_at) = producer.join().unwrap();

    assert_eq!(result, Ok(()));
    assert!(woke_at.duration_since(freed_at) < Duration::from_millis(500));
    assert!(q.total_blocked_ns() > 0);
    assert_eq!(q.dequeue().map(|f| f.sequence), Some(1));
    assert_eq!(q.dequeue().map(|f| f.sequence), Some(2));
}

#[test]
fn test_shutdown_wakes_every_blocked_producer() {
    let q = Arc::new(BoundedQueue::new(1, BackpressurePolicy::Block));
    q.enqueue(Frame::new(1, 1)).unwrap();

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let q = q.clone();
            thread::spawn(move || q.enqueue(Frame::new(1, 1)))
        })
        .collect();
    thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    q.shutdown();
    for producer in producers {
        assert_eq!(producer.join().unwrap(), Err(QueueError::Shutdown));
    }
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(q.len(), 1);
}

#[test]
fn test_block_preserves_order_across_threads() {
    let q = Arc::new(BoundedQueue::new(3, BackpressurePolicy::Block));
    let producer = {
        let q = q.clone();
        thread::spawn(move || {
            for seq in 0..500 {
                q.enqueue(FrameBuilder::new(1, 2).sequence(seq).build())
                    .unwrap();
            }
        })
    };

    let mut received = Vec::with_capacity(500);
    let deadline = Instant::now() + common::test_timeout();
    while received.len() < 500 && Instant::now() < deadline {
        match q.dequeue() {
            Some(frame) => received.push(frame.sequence),
            None => thread::yield_now(),
        }
        assert!(q.len() <= q.capacity());
    }
    producer.join().unwrap();

    assert_eq!(received, (0..500).collect::<Vec<u64>>());
    assert_eq!(q.total_dropped(), 0);
    assert_eq!(q.total_enqueued(), 500);
}
