//! Fixed-rate loop scheduler with overrun accounting.
//!
//! `sleep()` advances a monotonic "next tick" schedule by one period. When
//! the loop overruns, the schedule restarts from now instead of bursting
//! through the missed ticks; bursts would flood the serial and TCP pipelines
//! downstream. Lateness counters are exposed for the health summary.

use std::thread;
use std::time::{Duration, Instant};

/// Periodic scheduler for worker loops
#[derive(Debug)]
pub struct RateLimiter {
    hz: f64,
    next: Instant,
    late_ticks: u64,
    skipped_ticks: u64,
    last_late_s: f64,
    max_late_s: f64,
}

impl RateLimiter {
    pub fn new(hz: f64) -> Self {
        Self {
            hz: if hz > 0.0 { hz } else { 1.0 },
            next: Instant::now(),
            late_ticks: 0,
            skipped_ticks: 0,
            last_late_s: 0.0,
            max_late_s: 0.0,
        }
    }

    /// Change the rate; takes effect on the next `sleep`
    pub fn set_hz(&mut self, hz: f64) {
        self.hz = if hz > 0.0 { hz } else { 1.0 };
    }

    pub fn hz(&self) -> f64 {
        self.hz
    }

    /// Restart the schedule from now and zero the counters
    pub fn reset(&mut self) {
        self.next = Instant::now();
        self.late_ticks = 0;
        self.skipped_ticks = 0;
        self.last_late_s = 0.0;
        self.max_late_s = 0.0;
    }

    /// Ticks where the loop was late enough to skip ahead
    pub fn late_ticks(&self) -> u64 {
        self.late_ticks
    }

    /// Estimated periods skipped across all overruns
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks
    }

    /// Lateness of the most recent overrun, seconds
    pub fn last_late_s(&self) -> f64 {
        self.last_late_s
    }

    /// Worst lateness observed, seconds
    pub fn max_late_s(&self) -> f64 {
        self.max_late_s
    }

    /// Sleep until the next tick, skipping ahead on overrun
    pub fn sleep(&mut self) {
        let period = Duration::from_secs_f64(1.0 / self.hz);
        self.next += period;

        let now = Instant::now();
        if now > self.next {
            let late_s = (now - self.next).as_secs_f64();
            self.last_late_s = late_s;
            if late_s > self.max_late_s {
                self.max_late_s = late_s;
            }
            self.late_ticks += 1;

            // Conservative estimate of missed periods (+1 for the current one)
            self.skipped_ticks += (late_s / period.as_secs_f64()) as u64 + 1;

            self.next = now + period;
        }

        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holds_rate_when_loop_is_fast() {
        let mut rl = RateLimiter::new(200.0);
        rl.reset();
        let start = Instant::now();
        for _ in 0..10 {
            rl.sleep();
        }
        let elapsed = start.elapsed().as_secs_f64();
        // 10 ticks at 5 ms each; allow generous slack for CI schedulers
        assert!(elapsed >= 0.045, "ran too fast: {elapsed}");
    }

    #[test]
    fn test_overrun_skips_ahead() {
        let mut rl = RateLimiter::new(1000.0);
        rl.reset();
        thread::sleep(Duration::from_millis(20));
        rl.sleep();
        assert_eq!(rl.late_ticks(), 1);
        assert!(rl.skipped_ticks() >= 15);
        assert!(rl.last_late_s() > 0.0);
        assert!(rl.max_late_s() >= rl.last_late_s());

        // schedule restarted from "now": the next tick is on time again
        rl.sleep();
        assert_eq!(rl.late_ticks(), 1);
    }

    #[test]
    fn test_set_hz_rejects_nonpositive() {
        let mut rl = RateLimiter::new(0.0);
        assert_eq!(rl.hz(), 1.0);
        rl.set_hz(-5.0);
        assert_eq!(rl.hz(), 1.0);
        rl.set_hz(250.0);
        assert_eq!(rl.hz(), 250.0);
    }
}
