//! Controller worker: fuses remote commands, system mode and the watchdog
//! into the motor request the USB worker applies.
//!
//! The two autonomous modes are hooks: they receive the full sensor
//! snapshot (and the remote setpoint) but output zero until an algorithm is
//! plugged in. The watchdog runs independently of the mode branch, so even
//! a wedged control algorithm cannot produce runaway motion.

use crate::config::TimeoutMode;
use crate::core::time::now_mono_s;
use crate::core::types::{ControlMode, EventType, MotorCommands};
use crate::shared::{SharedState, cmd_timed_out};
use crate::sync::{RateLimiter, StopFlag};
use std::sync::Arc;

/// Upper bound on system events processed per cycle
const MAX_SYS_EVENTS_PER_CYCLE: usize = 32;

/// Pick the motor output for one cycle
fn compute_output(
    running: bool,
    timed_out: bool,
    mode: ControlMode,
    remote: MotorCommands,
) -> MotorCommands {
    if !running || timed_out {
        return MotorCommands::ZERO;
    }
    match mode {
        ControlMode::PassThrough => remote,
        // Hooks: sensor state and setpoint are snapshotted by the caller
        // and available here once an algorithm lands
        ControlMode::Autonomous | ControlMode::AutonomousWithSetpoint => MotorCommands::ZERO,
    }
}

pub struct ControllerWorker {
    sh: Arc<SharedState>,
    stop: Arc<StopFlag>,
}

impl ControllerWorker {
    pub fn new(sh: Arc<SharedState>, stop: Arc<StopFlag>) -> Self {
        Self { sh, stop }
    }

    pub fn run(self) {
        let cfg = self.sh.config();
        try_set_fifo_priority(cfg.ctrl_thread_priority);

        log::info!("Controller started ({:?})", cfg.control_mode);

        let mut rate = RateLimiter::new(cfg.ctrl_hz);
        let mut last_timeout_warn_s: f64 = f64::NEG_INFINITY;

        while !self.stop.stop_requested() {
            let cfg = self.sh.config();
            rate.set_hz(cfg.ctrl_hz);

            let _st = self.sh.latest_state.load_or_default();
            let remote = self.sh.latest_remote_motor_cmd.load_or_default();
            let _sp = self.sh.latest_setpoint_cmd.load_or_default();

            let mut sys = self.sh.system_state.load_or_default();
            sys.control_mode = cfg.control_mode;

            // Flag-edge events: arm / disarm / reset
            self.sh.sys_event_q.drain(MAX_SYS_EVENTS_PER_CYCLE, |ev| {
                if ev.kind != EventType::FlagRise {
                    return;
                }
                let bit = ev.data0 as i8;
                if cfg.flag_start_bit >= 0 && bit == cfg.flag_start_bit {
                    log::info!("Start flag: system armed");
                    sys.running = true;
                }
                if cfg.flag_stop_bit >= 0 && bit == cfg.flag_stop_bit {
                    log::info!("Stop flag: system disarmed");
                    sys.running = false;
                }
                if cfg.flag_reset_bit >= 0 && bit == cfg.flag_reset_bit {
                    log::info!("Reset flag: system disarmed, commands cleared");
                    sys.running = false;
                    self.sh.latest_remote_motor_cmd.store(MotorCommands::ZERO);
                    self.sh.latest_setpoint_cmd.store(Default::default());
                }
            });

            // Watchdog (independent of the mode branch below)
            let mut timed_out = false;
            if cfg.usb_timeout_mode == TimeoutMode::Enforce {
                let now = now_mono_s();
                let last_rx = self.sh.last_cmd_rx_mono_s();
                if cmd_timed_out(last_rx, now, cfg.cmd_timeout_s) {
                    timed_out = true;
                    if now - last_timeout_warn_s >= 1.0 {
                        last_timeout_warn_s = now;
                        log::warn!(
                            "Command timeout: {:.3}s > {:.3}s, output forced to zero",
                            now - last_rx,
                            cfg.cmd_timeout_s
                        );
                    }
                }
            }

            let out = compute_output(sys.running, timed_out, sys.control_mode, remote);

            self.sh.system_state.store(sys);
            self.sh.latest_motor_cmd_request.store(out);

            rate.sleep();
        }

        // Whatever the USB worker writes last must be safe
        self.sh.latest_motor_cmd_request.store(MotorCommands::ZERO);

        log::info!("Controller stopped");
    }
}

/// Best-effort SCHED_FIFO for the current thread; failure is logged, never
/// fatal (needs CAP_SYS_NICE or root)
#[cfg(unix)]
fn try_set_fifo_priority(prio: i16) {
    use thread_priority::{
        RealtimeThreadSchedulePolicy, ThreadPriority, ThreadPriorityValue, ThreadSchedulePolicy,
        set_thread_priority_and_policy, thread_native_id,
    };

    if prio <= 0 {
        return;
    }
    let Ok(value) = ThreadPriorityValue::try_from(prio.clamp(1, 99) as u8) else {
        return;
    };
    match set_thread_priority_and_policy(
        thread_native_id(),
        ThreadPriority::Crossplatform(value),
        ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
    ) {
        Ok(()) => log::info!("Controller thread running with FIFO priority {}", prio),
        Err(e) => log::warn!(
            "Could not set controller thread priority {}: {:?}",
            prio,
            e
        ),
    }
}

#[cfg(not(unix))]
fn try_set_fifo_priority(_prio: i16) {}
