//! Latest-value mailbox: one writer, many readers, newest value wins.
//!
//! The slot sits behind a `parking_lot` mutex held only for the duration of
//! a copy, so readers may see a stale value but never a torn one. The
//! sequence counter is atomic and separate from the lock: a reader that
//! observes a nonzero sequence (acquire) is guaranteed the matching `store`
//! (release) completed on the writer thread.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cell holding the most recent value of `T` with a write sequence
#[derive(Debug, Default)]
pub struct Mailbox<T> {
    slot: Mutex<T>,
    seq: AtomicU64,
}

impl<T: Clone + Default> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(T::default()),
            seq: AtomicU64::new(0),
        }
    }

    /// Overwrite the slot and advance the sequence.
    ///
    /// Single-writer: only one worker may call this on a given mailbox.
    pub fn store(&self, v: T) {
        *self.slot.lock() = v;
        self.seq.fetch_add(1, Ordering::Release);
    }

    /// Copy of the latest value, or `None` if nothing was ever stored
    pub fn load(&self) -> Option<T> {
        if self.seq.load(Ordering::Acquire) == 0 {
            return None;
        }
        Some(self.slot.lock().clone())
    }

    /// Copy of the latest value, default if nothing was ever stored
    pub fn load_or_default(&self) -> T {
        self.slot.lock().clone()
    }

    /// Number of stores so far
    pub fn seq(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_empty_mailbox() {
        let mb: Mailbox<u32> = Mailbox::new();
        assert_eq!(mb.load(), None);
        assert_eq!(mb.load_or_default(), 0);
        assert_eq!(mb.seq(), 0);
    }

    #[test]
    fn test_store_load() {
        let mb = Mailbox::new();
        mb.store(7u32);
        assert_eq!(mb.load(), Some(7));
        mb.store(9);
        assert_eq!(mb.load(), Some(9));
        assert_eq!(mb.seq(), 2);
    }

    #[test]
    fn test_readers_see_some_written_value() {
        let mb = Arc::new(Mailbox::new());
        let writer = {
            let mb = Arc::clone(&mb);
            thread::spawn(move || {
                for i in 1..=1000u64 {
                    mb.store(i);
                }
            })
        };
        let reader = {
            let mb = Arc::clone(&mb);
            thread::spawn(move || {
                let mut last = 0u64;
                for _ in 0..1000 {
                    if let Some(v) = mb.load() {
                        // values only move forward from this reader's view
                        assert!(v >= last);
                        last = v;
                    }
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(mb.load(), Some(1000));
    }
}
