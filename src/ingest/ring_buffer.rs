//! Lock-free single-producer/single-consumer ring buffer.
//!
//! [`RingBuffer::new`] returns a [`RingProducer`] and a [`RingConsumer`].
//! Neither half is `Clone` and both mutating operations take `&mut self`, so
//! there is exactly one writer of `head` and one writer of `tail`.
//!
//! The backing store has `capacity + 1` slots; one slot always stays empty so
//! `head == tail` means empty without a separate counter. The producer stores
//! `head` with `Release` after copying samples in, the consumer stores `tail`
//! with `Release` after copying them out, and each side loads the other's
//! index with `Acquire`.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared state of a ring. Only reachable through its two halves.
pub struct RingBuffer<T> {
    slots: Box<[UnsafeCell<T>]>,
    head: AtomicUsize,
    tail: AtomicUsize,
    closed: AtomicBool,
}

// SAFETY: slots in `[tail, head)` are only read by the consumer and slots
// outside it only written by the producer; the index handoff uses
// Release/Acquire so a slot is never accessed by both sides at once.
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T: Copy + Default> RingBuffer<T> {
    /// Ring holding up to `capacity` elements (at least one).
    #[allow(clippy::new_ret_no_self)]
    pub fn new(capacity: usize) -> (RingProducer<T>, RingConsumer<T>) {
        let slots = (0..capacity.max(1) + 1)
            .map(|_| UnsafeCell::new(T::default()))
            .collect();
        let ring = Arc::new(RingBuffer {
            slots,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        (
            RingProducer { ring: ring.clone() },
            RingConsumer { ring },
        )
    }
}

impl<T> RingBuffer<T> {
    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn slot_ptr(&self, index: usize) -> *mut T {
        UnsafeCell::raw_get(self.slots.as_ptr().wrapping_add(index))
    }

    pub fn capacity(&self) -> usize {
        self.slot_count() - 1
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if head >= tail {
            head - tail
        } else {
            self.slot_count() - tail + head
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity() as f64
    }

    /// Whether the producer half has been dropped or closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Write half of a [`RingBuffer`].
pub struct RingProducer<T> {
    ring: Arc<RingBuffer<T>>,
}

impl<T: Copy> RingProducer<T> {
    /// Copy as many leading elements of `src` as fit. Returns the count
    /// pushed; the caller accounts for the rest as dropped.
    pub fn push_bulk(&mut self, src: &[T]) -> usize {
        let ring = &*self.ring;
        let cap = ring.slot_count();
        let head = ring.head.load(Ordering::Relaxed);
        let tail = ring.tail.load(Ordering::Acquire);

        let free = if head >= tail {
            cap - 1 - head + tail
        } else {
            tail - head - 1
        };
        let n = src.len().min(free);
        if n == 0 {
            return 0;
        }

        let first = n.min(cap - head);
        // SAFETY: slots [head, head + n) modulo `cap` are free, so the
        // consumer does not read them until `head` is published below.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), ring.slot_ptr(head), first);
            ptr::copy_nonoverlapping(src.as_ptr().add(first), ring.slot_ptr(0), n - first);
        }

        ring.head.store((head + n) % cap, Ordering::Release);
        n
    }

    pub fn push(&mut self, item: T) -> bool {
        self.push_bulk(std::slice::from_ref(&item)) == 1
    }
}

impl<T> RingProducer<T> {
    pub fn ring(&self) -> &RingBuffer<T> {
        &self.ring
    }

    pub fn fill_ratio(&self) -> f64 {
        self.ring.fill_ratio()
    }

    /// Mark the stream finished. The consumer still drains what is buffered.
    pub fn close(&mut self) {
        self.ring.closed.store(true, Ordering::Release);
    }
}

impl<T> Drop for RingProducer<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read half of a [`RingBuffer`].
pub struct RingConsumer<T> {
    ring: Arc<RingBuffer<T>>,
}

impl<T: Copy> RingConsumer<T> {
    /// Copy up to `dst.len()` elements out. Returns the count popped.
    pub fn pop_bulk(&mut self, dst: &mut [T]) -> usize {
        let ring = &*self.ring;
        let n = self.reserve(dst.len());
        if n == 0 {
            return 0;
        }

        let cap = ring.slot_count();
        let tail = ring.tail.load(Ordering::Relaxed);
        let first = n.min(cap - tail);
        // SAFETY: slots [tail, tail + n) modulo `cap` were published by the
        // producer and are not rewritten until `tail` moves past them.
        unsafe {
            ptr::copy_nonoverlapping(ring.slot_ptr(tail), dst.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(ring.slot_ptr(0), dst.as_mut_ptr().add(first), n - first);
        }

        ring.tail.store((tail + n) % cap, Ordering::Release);
        n
    }

    pub fn pop(&mut self) -> Option<T> {
        let ring = &*self.ring;
        if self.reserve(1) == 0 {
            return None;
        }
        let tail = ring.tail.load(Ordering::Relaxed);
        // SAFETY: see `pop_bulk`.
        let item = unsafe { ptr::read(ring.slot_ptr(tail)) };
        ring.tail.store((tail + 1) % ring.slot_count(), Ordering::Release);
        Some(item)
    }
}

impl<T> RingConsumer<T> {
    /// Readable count, capped at `max`.
    fn reserve(&self, max: usize) -> usize {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Acquire);
        let tail = ring.tail.load(Ordering::Relaxed);
        let available = if head >= tail {
            head - tail
        } else {
            ring.slot_count() - tail + head
        };
        available.min(max)
    }

    /// Skip up to `max` elements without copying them.
    pub fn discard_bulk(&mut self, max: usize) -> usize {
        let n = self.reserve(max);
        if n > 0 {
            let ring = &*self.ring;
            let tail = ring.tail.load(Ordering::Relaxed);
            ring.tail.store((tail + n) % ring.slot_count(), Ordering::Release);
        }
        n
    }

    pub fn ring(&self) -> &RingBuffer<T> {
        &self.ring
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn fill_ratio(&self) -> f64 {
        self.ring.fill_ratio()
    }

    /// True once the producer is closed and everything has been read.
    pub fn is_finished(&self) -> bool {
        self.ring.is_closed() && self.ring.is_empty()
    }
}
