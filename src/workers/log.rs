//! Log worker: drains the recorder rings into the rotating binary log.
//!
//! Disk I/O happens only on this thread. Drop counters are reported at
//! 1 Hz so silent data loss is visible in the journal, and a 5 s health
//! summary gives a heartbeat for long unattended runs.

use crate::binlog::{
    RecordType, RotatingBinaryLog, encode_cmd_sample, encode_event_sample, encode_state_sample,
};
use crate::core::time::now_mono_s;
use crate::shared::SharedState;
use crate::sync::StopFlag;
use log::{info, warn};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

/// Records drained per ring per cycle
const DRAIN_BATCH: usize = 1024;

/// Idle cadence between drain passes
const CYCLE_MS: u64 = 5;

pub struct LogWorker {
    sh: Arc<SharedState>,
    stop: Arc<StopFlag>,
}

/// Snapshot of every drop counter, for delta reporting
#[derive(Default, Clone, Copy, PartialEq, Eq)]
struct DropCounts {
    state: u64,
    cmd: u64,
    event: u64,
    sys_event: u64,
    event_q: u64,
    sys_q: u64,
}

impl LogWorker {
    pub fn new(sh: Arc<SharedState>, stop: Arc<StopFlag>) -> Self {
        Self { sh, stop }
    }

    fn drop_counts(&self) -> DropCounts {
        DropCounts {
            state: self.sh.state_ring.drops(),
            cmd: self.sh.cmd_ring.drops(),
            event: self.sh.event_ring.drops(),
            sys_event: self.sh.sys_event_ring.drops(),
            event_q: self.sh.event_cmd_q.drops(),
            sys_q: self.sh.sys_event_q.drops(),
        }
    }

    pub fn run(self) {
        let cfg = self.sh.config();

        let mut writer = if cfg.binary_log {
            match RotatingBinaryLog::open(
                &cfg.log_path,
                cfg.log_rotate_mb as u64 * 1024 * 1024,
                cfg.log_rotate_keep,
            ) {
                Ok(w) => Some(w),
                Err(e) => {
                    warn!("Cannot open binary log {}: {}", cfg.log_path, e);
                    None
                }
            }
        } else {
            None
        };

        let mut last_drop_report_s = now_mono_s();
        let mut last_health_s = now_mono_s();
        let mut last_drops = DropCounts::default();

        while !self.stop.stop_requested() {
            let cfg = self.sh.config();
            if let Some(w) = writer.as_mut() {
                w.set_rotation(cfg.log_rotate_mb as u64 * 1024 * 1024, cfg.log_rotate_keep);
            }

            self.sh.state_ring.drain(DRAIN_BATCH, |s| {
                if let Some(w) = writer.as_mut()
                    && let Err(e) = w.write_record(RecordType::State, s.ts, &encode_state_sample(&s))
                {
                    warn!("State record write failed: {}", e);
                }
            });

            self.sh.cmd_ring.drain(DRAIN_BATCH, |c| {
                if let Some(w) = writer.as_mut()
                    && let Err(e) = w.write_record(RecordType::Cmd, c.ts, &encode_cmd_sample(&c))
                {
                    warn!("Cmd record write failed: {}", e);
                }
            });

            // Both event rings produce EVENT records
            self.sh.event_ring.drain(DRAIN_BATCH, |ev| {
                if let Some(w) = writer.as_mut()
                    && let Err(e) = w.write_record(RecordType::Event, ev.ts, &encode_event_sample(&ev))
                {
                    warn!("Event record write failed: {}", e);
                }
            });
            self.sh.sys_event_ring.drain(DRAIN_BATCH, |ev| {
                if let Some(w) = writer.as_mut()
                    && let Err(e) = w.write_record(RecordType::Event, ev.ts, &encode_event_sample(&ev))
                {
                    warn!("Event record write failed: {}", e);
                }
            });

            let now = now_mono_s();

            // Drop-count deltas at 1 Hz
            if now - last_drop_report_s >= 1.0 {
                last_drop_report_s = now;
                let d = self.drop_counts();
                if d != last_drops {
                    if d.state != last_drops.state {
                        warn!("Ring drops: state_ring={}", d.state);
                    }
                    if d.cmd != last_drops.cmd {
                        warn!("Ring drops: cmd_ring={}", d.cmd);
                    }
                    if d.event != last_drops.event {
                        warn!("Ring drops: event_ring={}", d.event);
                    }
                    if d.sys_event != last_drops.sys_event {
                        warn!("Ring drops: sys_event_ring={}", d.sys_event);
                    }
                    if d.event_q != last_drops.event_q {
                        warn!("Ring drops: event_cmd_q={}", d.event_q);
                    }
                    if d.sys_q != last_drops.sys_q {
                        warn!("Ring drops: sys_event_q={}", d.sys_q);
                    }
                    last_drops = d;
                }
            }

            // Health summary at 5 s
            if now - last_health_s >= 5.0 {
                last_health_s = now;
                let last_rx = self.sh.last_cmd_rx_mono_s();
                let cmd_age = if last_rx > 0.0 {
                    format!("{:.2}s", now - last_rx)
                } else {
                    "never".to_string()
                };
                info!(
                    "Health: rates usb={:.0}/tcp={:.0}/ctrl={:.0} Hz, last cmd {}, \
                     serial_errors={}, tcp_frames_bad={}",
                    cfg.usb_hz,
                    cfg.tcp_hz,
                    cfg.ctrl_hz,
                    cmd_age,
                    self.sh.serial_errors.load(Ordering::Relaxed),
                    self.sh.tcp_frames_bad.load(Ordering::Relaxed),
                );
            }

            thread::sleep(Duration::from_millis(CYCLE_MS));
        }

        if let Some(mut w) = writer.take() {
            w.close();
        }
        info!("Log worker stopped");
    }
}
