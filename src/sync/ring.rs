//! Single-producer/single-consumer overwrite ring.
//!
//! Built on `crossbeam_queue::ArrayQueue`, whose `force_push` replaces the
//! oldest element when the queue is full. A ring created with `slots` slots
//! buffers at most `slots - 1` items, matching the classic index-based ring
//! that keeps one slot free to tell full from empty; drop accounting and
//! capacity therefore line up with the recorder tooling that reads these
//! counters.
//!
//! `drops` is an observation value for diagnostics, not a control signal.

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bounded queue that discards the oldest element when full
#[derive(Debug)]
pub struct OverwriteRing<T> {
    inner: ArrayQueue<T>,
    drops: AtomicU64,
}

impl<T> OverwriteRing<T> {
    /// Create a ring with `slots` slots (buffers `slots - 1` items)
    ///
    /// # Panics
    ///
    /// Panics if `slots < 2`.
    pub fn new(slots: usize) -> Self {
        assert!(slots >= 2, "ring needs at least 2 slots");
        Self {
            inner: ArrayQueue::new(slots - 1),
            drops: AtomicU64::new(0),
        }
    }

    /// Push, overwriting the oldest element if the ring is full.
    ///
    /// Single-producer: only one worker may push into a given ring.
    pub fn push_overwrite(&self, item: T) {
        if self.inner.force_push(item).is_some() {
            self.drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Pop the oldest element, `None` when empty.
    ///
    /// Single-consumer: only one worker may pop from a given ring.
    pub fn pop(&self) -> Option<T> {
        self.inner.pop()
    }

    /// Pop up to `max` elements, invoking `f` for each; returns the count
    pub fn drain<F: FnMut(T)>(&self, max: usize, mut f: F) -> usize {
        let mut n = 0;
        while n < max {
            match self.inner.pop() {
                Some(v) => {
                    f(v);
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// Total elements discarded by overwriting pushes
    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
