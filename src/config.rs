//! Runtime configuration: CLI flags, defaults, and hot-reload.
//!
//! `RuntimeConfig` is an immutable snapshot. The live copy sits in an
//! `ArcSwap` inside [`crate::shared::SharedState`]; every mutation (a
//! `MSG_CONFIG` frame) clones the current snapshot, patches one field with
//! clamping, and swaps the pointer. Readers grab a coherent snapshot with a
//! single load and never observe a half-updated record.

use crate::core::types::ControlMode;
use crate::wire::payload::ConfigPayload;
use clap::Parser;

/// Command-watchdog gating
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum TimeoutMode {
    /// Zero the motors when no fresh command arrived within the window
    #[default]
    Enforce = 0,
    /// Watchdog disabled (bench use only)
    Disable = 1,
}

impl TimeoutMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(TimeoutMode::Enforce),
            1 => Some(TimeoutMode::Disable),
            _ => None,
        }
    }
}

/// Immutable configuration snapshot
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    // Rates
    pub usb_hz: f64,
    pub tcp_hz: f64,
    pub ctrl_hz: f64,

    // Network
    pub bind_ip: String,
    pub state_port: u16,
    pub cmd_port: u16,

    // Serial
    pub serial_dev: String,
    pub serial_baud: u32,

    // Safety
    pub cmd_timeout_s: f64,
    pub usb_timeout_mode: TimeoutMode,

    // Control
    pub control_mode: ControlMode,
    /// SCHED_FIFO priority for the controller thread (1..99), 0 disables
    pub ctrl_thread_priority: i16,

    // Logging
    pub binary_log: bool,
    pub log_path: String,
    pub log_rotate_mb: u32,
    pub log_rotate_keep: u32,

    // Flag routing
    pub flag_event_mask: u8,
    pub flag_start_bit: i8,
    pub flag_stop_bit: i8,
    pub flag_reset_bit: i8,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            usb_hz: 200.0,
            tcp_hz: 200.0,
            ctrl_hz: 200.0,
            bind_ip: "0.0.0.0".to_string(),
            state_port: 30001,
            cmd_port: 30002,
            serial_dev: "/dev/ttyUSB0".to_string(),
            serial_baud: 115200,
            cmd_timeout_s: 0.2,
            usb_timeout_mode: TimeoutMode::Enforce,
            control_mode: ControlMode::PassThrough,
            ctrl_thread_priority: 0,
            binary_log: true,
            log_path: "./logs/gateway.bin".to_string(),
            log_rotate_mb: 256,
            log_rotate_keep: 10,
            flag_event_mask: 0x07,
            flag_start_bit: -1,
            flag_stop_bit: -1,
            flag_reset_bit: -1,
        }
    }
}

fn clamp_f64(v: f64, lo: f64, hi: f64) -> f64 {
    v.clamp(lo, hi)
}

/// Hot-reload keys accepted in `MSG_CONFIG` frames
pub mod config_key {
    pub const USB_HZ: u8 = 1;
    pub const TCP_HZ: u8 = 2;
    pub const CTRL_HZ: u8 = 3;
    pub const CMD_TIMEOUT_MS: u8 = 4;
    pub const USB_TIMEOUT_MODE: u8 = 5;
    pub const LOG_ROTATE_MB: u8 = 6;
    pub const LOG_ROTATE_KEEP: u8 = 7;
    pub const FLAG_EVENT_MASK: u8 = 10;
    pub const CONTROL_MODE: u8 = 20;
    pub const CTRL_THREAD_PRIORITY: u8 = 30;
}

impl RuntimeConfig {
    /// Build the next snapshot with one config frame applied.
    ///
    /// Out-of-range values are clamped, never rejected; invalid enum values
    /// and unknown keys leave the snapshot unchanged (the caller still
    /// emits `CONFIG_APPLIED`, so remotes can detect no-ops by re-reading).
    pub fn with_applied(&self, p: &ConfigPayload) -> RuntimeConfig {
        use config_key::*;

        let mut next = self.clone();
        match p.key {
            USB_HZ => next.usb_hz = clamp_f64(p.v_u16 as f64, 1.0, 2000.0),
            TCP_HZ => next.tcp_hz = clamp_f64(p.v_u16 as f64, 1.0, 2000.0),
            CTRL_HZ => next.ctrl_hz = clamp_f64(p.v_u16 as f64, 1.0, 2000.0),
            CMD_TIMEOUT_MS => {
                next.cmd_timeout_s = clamp_f64(p.v_u16 as f64 / 1000.0, 0.01, 5.0);
            }
            USB_TIMEOUT_MODE => {
                if let Some(mode) = TimeoutMode::from_u8(p.v_u8) {
                    next.usb_timeout_mode = mode;
                }
            }
            LOG_ROTATE_MB => {
                next.log_rotate_mb = (p.v_u16 as u32).clamp(1, 8192);
            }
            LOG_ROTATE_KEEP => {
                next.log_rotate_keep = (p.v_u16 as u32).clamp(1, 200);
            }
            FLAG_EVENT_MASK => next.flag_event_mask = p.v_u8,
            CONTROL_MODE => {
                if let Some(mode) = ControlMode::from_u8(p.v_u8) {
                    next.control_mode = mode;
                }
            }
            CTRL_THREAD_PRIORITY => next.ctrl_thread_priority = p.v_u16 as i16,
            _ => {} // unknown key: ignore
        }
        next
    }
}

// ---- CLI ----

fn parse_u8_maybe_hex(s: &str) -> Result<u8, String> {
    let v = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else {
        s.parse::<u8>()
    };
    v.map_err(|_| format!("invalid byte value: {s}"))
}

fn parse_control_mode(s: &str) -> Result<ControlMode, String> {
    match s {
        "pass" => Ok(ControlMode::PassThrough),
        "auto" => Ok(ControlMode::Autonomous),
        "setpoint" => Ok(ControlMode::AutonomousWithSetpoint),
        _ => Err(format!("unknown control mode: {s} (pass|auto|setpoint)")),
    }
}

fn parse_timeout_mode(s: &str) -> Result<TimeoutMode, String> {
    match s {
        "enforce" => Ok(TimeoutMode::Enforce),
        "disable" => Ok(TimeoutMode::Disable),
        _ => Err(format!("unknown timeout mode: {s} (enforce|disable)")),
    }
}

/// Gateway daemon for a serial-attached motor/IMU controller board
#[derive(Parser, Debug)]
#[command(name = "roverd", version)]
pub struct Cli {
    /// Serial device node of the controller board
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub serial: String,

    /// Serial baud rate
    #[arg(long, default_value_t = 115200)]
    pub baud: u32,

    /// Listener bind address
    #[arg(long = "bind_ip", default_value = "0.0.0.0")]
    pub bind_ip: String,

    /// Port for state fan-out clients
    #[arg(long = "state_port", default_value_t = 30001)]
    pub state_port: u16,

    /// Port for command/config clients
    #[arg(long = "cmd_port", default_value_t = 30002)]
    pub cmd_port: u16,

    /// USB worker rate (Hz)
    #[arg(long = "usb_hz")]
    pub usb_hz: Option<f64>,

    /// TCP worker rate (Hz)
    #[arg(long = "tcp_hz")]
    pub tcp_hz: Option<f64>,

    /// Controller worker rate (Hz)
    #[arg(long = "ctrl_hz")]
    pub ctrl_hz: Option<f64>,

    /// Shorthand: set all three worker rates at once (Hz)
    #[arg(long)]
    pub hz: Option<f64>,

    /// Command watchdog window in seconds
    #[arg(long = "cmd_timeout", default_value_t = 0.2)]
    pub cmd_timeout: f64,

    /// Watchdog gating: enforce or disable
    #[arg(long = "usb_timeout_mode", default_value = "enforce", value_parser = parse_timeout_mode)]
    pub usb_timeout_mode: TimeoutMode,

    /// Controller mode: pass, auto, or setpoint
    #[arg(long = "control_mode", default_value = "pass", value_parser = parse_control_mode)]
    pub control_mode: ControlMode,

    /// SCHED_FIFO priority for the controller thread (0 = off)
    #[arg(long = "ctrl_priority", default_value_t = 0)]
    pub ctrl_priority: i16,

    /// Enable the rotating binary log (1) or disable it (0)
    #[arg(long = "binary_log", default_value_t = 1)]
    pub binary_log: u8,

    /// Binary log target path; rotated segments derive from this name
    #[arg(long = "log_path", default_value = "./logs/gateway.bin")]
    pub log_path: String,

    /// Rotate the binary log after this many MiB
    #[arg(long = "log_rotate_mb", default_value_t = 256)]
    pub log_rotate_mb: u32,

    /// Keep at most this many rotated segments
    #[arg(long = "log_rotate_keep", default_value_t = 10)]
    pub log_rotate_keep: u32,

    /// Flag bits treated as rising-edge events (hex ok, e.g. 0x07)
    #[arg(long = "flag_event_mask", default_value = "0x07", value_parser = parse_u8_maybe_hex)]
    pub flag_event_mask: u8,

    /// Flag bit that arms the system on a rising edge (-1 disables)
    #[arg(long = "flag_start_bit", default_value_t = -1)]
    pub flag_start_bit: i8,

    /// Flag bit that disarms the system on a rising edge (-1 disables)
    #[arg(long = "flag_stop_bit", default_value_t = -1)]
    pub flag_stop_bit: i8,

    /// Flag bit that disarms and clears latched commands (-1 disables)
    #[arg(long = "flag_reset_bit", default_value_t = -1)]
    pub flag_reset_bit: i8,
}

impl Cli {
    /// Turn parsed flags into the initial configuration snapshot
    pub fn into_config(self) -> RuntimeConfig {
        let defaults = RuntimeConfig::default();
        let all = self.hz;
        RuntimeConfig {
            usb_hz: self.usb_hz.or(all).unwrap_or(defaults.usb_hz),
            tcp_hz: self.tcp_hz.or(all).unwrap_or(defaults.tcp_hz),
            ctrl_hz: self.ctrl_hz.or(all).unwrap_or(defaults.ctrl_hz),
            bind_ip: self.bind_ip,
            state_port: self.state_port,
            cmd_port: self.cmd_port,
            serial_dev: self.serial,
            serial_baud: self.baud,
            cmd_timeout_s: self.cmd_timeout,
            usb_timeout_mode: self.usb_timeout_mode,
            control_mode: self.control_mode,
            ctrl_thread_priority: self.ctrl_priority,
            binary_log: self.binary_log != 0,
            log_path: self.log_path,
            log_rotate_mb: self.log_rotate_mb,
            log_rotate_keep: self.log_rotate_keep,
            flag_event_mask: self.flag_event_mask,
            flag_start_bit: self.flag_start_bit,
            flag_stop_bit: self.flag_stop_bit,
            flag_reset_bit: self.flag_reset_bit,
        }
    }
}
