//! Cooperative stop flag shared by all workers

use std::sync::atomic::{AtomicBool, Ordering};

/// Single-bit stop request. The signal thread (or a worker hitting a fatal
/// error) sets it; every worker polls it in its loop.
#[derive(Debug, Default)]
pub struct StopFlag {
    stop: AtomicBool,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_flag() {
        let flag = StopFlag::new();
        assert!(!flag.stop_requested());
        flag.request_stop();
        assert!(flag.stop_requested());
        // idempotent
        flag.request_stop();
        assert!(flag.stop_requested());
    }
}
