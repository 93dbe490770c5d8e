//! USB worker: owns the controller board and applies motor output.
//!
//! The board is the one mandatory resource in the system. Failing to open
//! it within the retry budget, or any motor write failure afterwards, raises
//! the stop flag; the rest of the daemon shuts down behind it.
//!
//! Safety behavior is deliberately redundant with the controller worker:
//! even if the controller wedges, this loop still forces zero motors when
//! the system is disarmed or the command watchdog expires.

use crate::board::BoardDriver;
use crate::core::time::{Timestamps, now_mono_s};
use crate::core::types::{EventSample, EventType, MotorCmdSample, MotorCommands, StateSample};
use crate::shared::{SharedState, cmd_timed_out};
use crate::sync::{RateLimiter, StopFlag};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Upper bound on hardware events executed per cycle, so a burst of beeps
/// cannot delay the motor/state path
const MAX_HW_EVENTS_PER_CYCLE: usize = 8;

/// Zero-motor frames sent on shutdown, spaced 10 ms apart
const SHUTDOWN_ZERO_BURST: usize = 5;

pub struct UsbWorker {
    sh: Arc<SharedState>,
    stop: Arc<StopFlag>,
}

impl UsbWorker {
    pub fn new(sh: Arc<SharedState>, stop: Arc<StopFlag>) -> Self {
        Self { sh, stop }
    }

    pub fn run(self) {
        let cfg = self.sh.config();

        let mut driver = match BoardDriver::connect(&cfg.serial_dev, cfg.serial_baud) {
            Ok(d) => d,
            Err(e) => {
                log::error!(
                    "Cannot open board on {}@{}: {}",
                    cfg.serial_dev,
                    cfg.serial_baud,
                    e
                );
                self.sh.mark_fatal();
                self.stop.request_stop();
                return;
            }
        };

        if let Err(e) = driver.start() {
            log::error!("Cannot start board reader: {}", e);
            self.sh.mark_fatal();
            self.stop.request_stop();
            return;
        }

        if let Err(e) = driver.set_auto_report(true, false) {
            log::error!("Cannot enable board auto-report: {}", e);
            self.bump_serial_errors();
            self.sh.mark_fatal();
            self.stop.request_stop();
            return;
        }
        // Reply is parsed and logged by the reader thread
        let _ = driver.request_version();

        log::info!("USB worker started on {}", cfg.serial_dev);

        let mut rate = RateLimiter::new(cfg.usb_hz);
        let mut state_seq: u32 = 0;
        let mut cmd_seq: u32 = 0;
        let mut last_timeout_warn_s: f64 = f64::NEG_INFINITY;

        while !self.stop.stop_requested() {
            let cfg = self.sh.config();
            rate.set_hz(cfg.usb_hz);

            let mut motors = self.sh.latest_motor_cmd_request.load_or_default();

            let sys = self.sh.system_state.load_or_default();
            if !sys.running {
                motors = MotorCommands::ZERO;
            }

            // Watchdog: stale commands force zero regardless of what the
            // controller last requested
            if cfg.usb_timeout_mode == crate::config::TimeoutMode::Enforce {
                let now = now_mono_s();
                let last_rx = self.sh.last_cmd_rx_mono_s();
                if cmd_timed_out(last_rx, now, cfg.cmd_timeout_s) {
                    motors = MotorCommands::ZERO;
                    if now - last_timeout_warn_s >= 1.0 {
                        last_timeout_warn_s = now;
                        log::warn!(
                            "Command timeout: {:.3}s since last command (> {:.3}s), motors zeroed",
                            now - last_rx,
                            cfg.cmd_timeout_s
                        );
                    }
                }
            }

            if let Err(e) = driver.set_motor(motors) {
                log::error!("Motor write failed: {}", e);
                self.bump_serial_errors();
                self.sh.mark_fatal();
                self.stop.request_stop();
                break;
            }

            // Bounded one-shot hardware events (beep)
            self.sh.event_cmd_q.drain(MAX_HW_EVENTS_PER_CYCLE, |ev| {
                if ev.kind == EventType::Beep
                    && let Err(e) = driver.set_beep(ev.data0 as u16)
                {
                    log::warn!("Beep write failed: {}", e);
                    self.bump_serial_errors();
                }
                self.sh.event_ring.push_overwrite(EventSample {
                    ts: Timestamps::now(),
                    ev,
                });
            });

            // Publish the sensor snapshot
            let st = driver.snapshot();
            self.sh.latest_state.store(st);
            state_seq = state_seq.wrapping_add(1);
            self.sh.state_ring.push_overwrite(StateSample {
                ts: Timestamps::now(),
                seq: state_seq,
                st,
            });

            // Record the command actually applied this cycle
            cmd_seq = cmd_seq.wrapping_add(1);
            self.sh.cmd_ring.push_overwrite(MotorCmdSample {
                ts: Timestamps::now(),
                seq: cmd_seq,
                motors,
            });

            rate.sleep();
        }

        // Last write could be lost on a dying link: repeat the zero command
        for _ in 0..SHUTDOWN_ZERO_BURST {
            if driver.set_motor(MotorCommands::ZERO).is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        driver.shutdown();

        log::info!("USB worker stopped (motors zeroed)");
    }

    fn bump_serial_errors(&self) {
        self.sh
            .serial_errors
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}
