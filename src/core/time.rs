//! Wall-clock / monotonic timestamp pairs.
//!
//! Every logged sample carries both clocks: `epoch_s` for correlating runs
//! with external recordings, `mono_s` for computing intervals. The monotonic
//! clock is anchored at the first call in the process, so `mono_s` starts
//! near zero and is comparable across all workers.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static MONO_ANCHOR: OnceLock<Instant> = OnceLock::new();

fn mono_anchor() -> Instant {
    *MONO_ANCHOR.get_or_init(Instant::now)
}

/// Seconds since process start on the monotonic clock
pub fn now_mono_s() -> f64 {
    mono_anchor().elapsed().as_secs_f64()
}

/// Wall clock and monotonic clock captured at the same moment
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Timestamps {
    /// Wall clock, seconds since the unix epoch
    pub epoch_s: f64,
    /// Monotonic clock, seconds since process start
    pub mono_s: f64,
}

impl Timestamps {
    pub fn now() -> Self {
        let epoch_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            epoch_s,
            mono_s: now_mono_s(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_mono_is_monotonic() {
        let a = Timestamps::now();
        thread::sleep(Duration::from_millis(5));
        let b = Timestamps::now();
        assert!(b.mono_s > a.mono_s);
        assert!(b.mono_s - a.mono_s >= 0.004);
    }

    #[test]
    fn test_epoch_is_plausible() {
        let ts = Timestamps::now();
        // Sometime after 2020
        assert!(ts.epoch_s > 1_577_836_800.0);
    }
}
