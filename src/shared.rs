//! State shared by the four workers.
//!
//! Workers never call each other; everything flows through this structure.
//! Mailboxes carry latest-wins values, overwrite rings carry sampled
//! streams for the recorder, and the configuration snapshot sits behind an
//! `ArcSwap` so readers pay one atomic load per cycle.
//!
//! Writer/reader assignments (one writer per mailbox/ring):
//! - `latest_state`, `state_ring`, `cmd_ring`, `event_ring`: USB worker
//! - `latest_remote_motor_cmd`, `latest_setpoint_cmd`, `sys_event_ring`,
//!   `event_cmd_q`, `sys_event_q`, `cfg`, `last_cmd_rx_mono_s`: TCP worker
//!   (the controller additionally clears the command mailboxes on a reset
//!   event; both writers are command-path serialized by the event queue)
//! - `latest_motor_cmd_request`, `system_state`: controller worker

use crate::config::RuntimeConfig;
use crate::core::time::now_mono_s;
use crate::core::types::{
    EventCmd, EventSample, MotorCmdSample, MotorCommands, StateSample, States, SystemState,
};
use crate::sync::{Mailbox, OverwriteRing};
use crate::wire::payload::SetpointPayload;
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Everything the workers communicate through
pub struct SharedState {
    /// Live configuration snapshot (read-copy-update, TCP worker writes)
    pub cfg: ArcSwap<RuntimeConfig>,

    pub latest_state: Mailbox<States>,
    pub latest_remote_motor_cmd: Mailbox<MotorCommands>,
    pub latest_setpoint_cmd: Mailbox<SetpointPayload>,
    /// Controller output, applied to the hardware by the USB worker
    pub latest_motor_cmd_request: Mailbox<MotorCommands>,
    pub system_state: Mailbox<SystemState>,

    /// Monotonic time of the last command frame received over TCP
    /// (f64 bit pattern; 0.0 = never)
    last_cmd_rx_mono_bits: AtomicU64,

    // Diagnostics
    pub tcp_frames_bad: AtomicU32,
    pub serial_errors: AtomicU32,
    /// Set alongside the stop flag when startup hit a fatal error
    pub fatal: AtomicBool,
    pub start_mono_s: f64,

    // One-shot event queues
    /// TCP -> USB hardware events (beep)
    pub event_cmd_q: OverwriteRing<EventCmd>,
    /// TCP -> controller system events (flag edges, config applied)
    pub sys_event_q: OverwriteRing<EventCmd>,

    // Recorder rings
    pub state_ring: OverwriteRing<StateSample>,
    pub cmd_ring: OverwriteRing<MotorCmdSample>,
    pub event_ring: OverwriteRing<EventSample>,
    pub sys_event_ring: OverwriteRing<EventSample>,
}

impl SharedState {
    pub fn new(cfg: RuntimeConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg: ArcSwap::from_pointee(cfg),
            latest_state: Mailbox::new(),
            latest_remote_motor_cmd: Mailbox::new(),
            latest_setpoint_cmd: Mailbox::new(),
            latest_motor_cmd_request: Mailbox::new(),
            system_state: Mailbox::new(),
            last_cmd_rx_mono_bits: AtomicU64::new(0.0f64.to_bits()),
            tcp_frames_bad: AtomicU32::new(0),
            serial_errors: AtomicU32::new(0),
            fatal: AtomicBool::new(false),
            start_mono_s: now_mono_s(),
            event_cmd_q: OverwriteRing::new(256),
            sys_event_q: OverwriteRing::new(256),
            state_ring: OverwriteRing::new(4096),
            cmd_ring: OverwriteRing::new(2048),
            event_ring: OverwriteRing::new(2048),
            sys_event_ring: OverwriteRing::new(2048),
        })
    }

    /// Current config snapshot
    pub fn config(&self) -> Arc<RuntimeConfig> {
        self.cfg.load_full()
    }

    /// Record that a command frame arrived now
    pub fn touch_cmd_rx(&self, mono_s: f64) {
        self.last_cmd_rx_mono_bits
            .store(mono_s.to_bits(), Ordering::Release);
    }

    /// Monotonic time of the last command frame, 0.0 if none ever arrived
    pub fn last_cmd_rx_mono_s(&self) -> f64 {
        f64::from_bits(self.last_cmd_rx_mono_bits.load(Ordering::Acquire))
    }

    /// Mark this run as failed and worth a nonzero exit code
    pub fn mark_fatal(&self) {
        self.fatal.store(true, Ordering::Release);
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }
}

/// Watchdog decision: true when commands have gone stale.
///
/// Requires that a command was ever seen; a gateway that never heard from a
/// client is idle, not timed out.
pub fn cmd_timed_out(last_rx_mono_s: f64, now_mono_s: f64, timeout_s: f64) -> bool {
    last_rx_mono_s > 0.0 && (now_mono_s - last_rx_mono_s) > timeout_s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_rx_timestamp_roundtrip() {
        let sh = SharedState::new(RuntimeConfig::default());
        assert_eq!(sh.last_cmd_rx_mono_s(), 0.0);
        sh.touch_cmd_rx(12.345);
        assert_eq!(sh.last_cmd_rx_mono_s(), 12.345);
    }

    #[test]
    fn test_timeout_requires_a_command_ever_seen() {
        assert!(!cmd_timed_out(0.0, 100.0, 0.2));
        assert!(!cmd_timed_out(99.9, 100.0, 0.2));
        assert!(cmd_timed_out(99.7, 100.0, 0.2));
    }

    #[test]
    fn test_config_swap_is_visible() {
        let sh = SharedState::new(RuntimeConfig::default());
        assert_eq!(sh.config().usb_hz, 200.0);

        let mut next = (*sh.config()).clone();
        next.usb_hz = 50.0;
        sh.cfg.store(Arc::new(next));
        assert_eq!(sh.config().usb_hz, 50.0);
    }
}
