//! Controller board line protocol.
//!
//! Outbound frame format: `[0xFF] [0xFC] [LEN] [FUNC] [payload..] [CHECKSUM]`
//! where `LEN` is the total frame length before the checksum minus one, and
//! the checksum is `(COMPLEMENT + sum of all prior bytes) & 0xFF`. Short
//! commands use the fixed two-parameter shape with `LEN = 0x05`.
//!
//! The board answers with a shifted second byte:
//! `[0xFF] [0xFB] [EXT_LEN] [EXT_TYPE] [data..] [RX_CHECK]` verified as
//! `(EXT_LEN + EXT_TYPE + sum(data except last)) & 0xFF == RX_CHECK`.

use crate::core::types::{Encoders, MotorCommands, States, Vec3, limit_motor_value};

pub const HEAD: u8 = 0xFF;
pub const DEVICE_ID: u8 = 0xFC;
/// Second byte of board responses (DEVICE_ID - 1)
pub const RESPONSE_ID: u8 = 0xFB;
/// Checksum seed: (257 - DEVICE_ID) mod 256
pub const COMPLEMENT: u8 = 0x05;

// Function words
pub const FUNC_AUTO_REPORT: u8 = 0x01;
pub const FUNC_BEEP: u8 = 0x02;
pub const FUNC_REPORT_SPEED: u8 = 0x0A;
pub const FUNC_REPORT_MPU_RAW: u8 = 0x0B;
pub const FUNC_REPORT_IMU_ATT: u8 = 0x0C;
pub const FUNC_REPORT_ENCODER: u8 = 0x0D;
pub const FUNC_REPORT_ICM_RAW: u8 = 0x0E;
pub const FUNC_MOTOR: u8 = 0x10;
pub const FUNC_REQUEST_DATA: u8 = 0x50;
pub const FUNC_VERSION: u8 = 0x51;

// Report scale factors (board-defined)
const GYRO_SCALE: f32 = 1.0 / 3754.9;
const ACCEL_SCALE: f32 = 1.0 / 1671.84;
const MAG_SCALE: f32 = 1.0;
const MILLI_SCALE: f32 = 1.0 / 1000.0;
const ATTITUDE_SCALE: f32 = 1.0 / 10000.0;

/// Additive frame checksum over `bytes`, seeded with the device complement
#[inline]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(COMPLEMENT, |sum, &b| sum.wrapping_add(b))
}

/// Fixed two-parameter command frame (7 bytes)
pub fn fixed5_frame(func: u8, p0: u8, p1: u8) -> [u8; 7] {
    let mut frame = [HEAD, DEVICE_ID, 0x05, func, p0, p1, 0];
    frame[6] = checksum(&frame[..6]);
    frame
}

/// Variable-length command frame
pub fn var_frame(func: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.push(HEAD);
    frame.push(DEVICE_ID);
    frame.push(0); // length patched below
    frame.push(func);
    frame.extend_from_slice(payload);
    frame[2] = (frame.len() - 1) as u8;
    frame.push(checksum(&frame));
    frame
}

// ---- Command builders ----

/// Motor command frame; each channel clamped to [-100, 100], 127 = keep
pub fn cmd_motor(m: MotorCommands) -> Vec<u8> {
    let payload = [
        limit_motor_value(m.m1) as u8,
        limit_motor_value(m.m2) as u8,
        limit_motor_value(m.m3) as u8,
        limit_motor_value(m.m4) as u8,
    ];
    var_frame(FUNC_MOTOR, &payload)
}

/// Buzzer one-shot; on-time in milliseconds as i16 across the two params
pub fn cmd_beep(on_time_ms: u16) -> [u8; 7] {
    let v = on_time_ms as i16;
    fixed5_frame(FUNC_BEEP, (v & 0xFF) as u8, ((v >> 8) & 0xFF) as u8)
}

/// Enable or disable unsolicited sensor reports
pub fn cmd_auto_report(enable: bool, forever: bool) -> [u8; 7] {
    let p0 = if enable { 1 } else { 0 };
    let p1 = if forever { 0x5F } else { 0 };
    fixed5_frame(FUNC_AUTO_REPORT, p0, p1)
}

/// One-shot data request for the given report function
pub fn cmd_request_data(function: u8, param: u8) -> [u8; 7] {
    fixed5_frame(FUNC_REQUEST_DATA, function, param)
}

// ---- Report parsing ----

#[inline]
fn le_i16(d: &[u8]) -> i16 {
    i16::from_le_bytes([d[0], d[1]])
}

#[inline]
fn le_i32(d: &[u8]) -> i32 {
    i32::from_le_bytes([d[0], d[1], d[2], d[3]])
}

/// Three consecutive raw i16 LE values as a float vector
#[inline]
fn raw_vec3(d: &[u8]) -> Vec3 {
    Vec3::new(le_i16(d) as f32, le_i16(&d[2..]) as f32, le_i16(&d[4..]) as f32)
}

/// Gyro axis order as the board reports it: (gx, -gy, -gz)
#[inline]
fn rearrange_gyro(v: Vec3) -> Vec3 {
    Vec3::new(v.x, -v.y, -v.z)
}

/// Board firmware version (major.minor)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub fn as_f32(self) -> f32 {
        self.major as f32 + self.minor as f32 / 10.0
    }
}

/// Fold a verified report payload into the sensor snapshot.
///
/// Returns `false` for report types this gateway does not track (they are
/// valid frames, just not interesting) and for short payloads.
pub fn apply_report(ext_type: u8, d: &[u8], st: &mut States) -> bool {
    match ext_type {
        FUNC_REPORT_SPEED if d.len() >= 7 => {
            // byte 6 is battery decivolts
            st.battery_voltage = d[6] as f32 / 10.0;
            true
        }
        FUNC_REPORT_MPU_RAW if d.len() >= 18 => {
            st.imu.gyro = rearrange_gyro(raw_vec3(d)).scaled(GYRO_SCALE);
            st.imu.acc = raw_vec3(&d[6..]).scaled(ACCEL_SCALE);
            st.imu.mag = raw_vec3(&d[12..]).scaled(MAG_SCALE);
            true
        }
        FUNC_REPORT_ICM_RAW if d.len() >= 18 => {
            st.imu.gyro = raw_vec3(d).scaled(MILLI_SCALE);
            st.imu.acc = raw_vec3(&d[6..]).scaled(MILLI_SCALE);
            st.imu.mag = raw_vec3(&d[12..]).scaled(MILLI_SCALE);
            true
        }
        FUNC_REPORT_IMU_ATT if d.len() >= 6 => {
            // board-defined units, stored as received
            st.ang.roll = le_i16(d) as f32 * ATTITUDE_SCALE;
            st.ang.pitch = le_i16(&d[2..]) as f32 * ATTITUDE_SCALE;
            st.ang.yaw = le_i16(&d[4..]) as f32 * ATTITUDE_SCALE;
            true
        }
        FUNC_REPORT_ENCODER if d.len() >= 16 => {
            st.enc = Encoders {
                e1: le_i32(d),
                e2: le_i32(&d[4..]),
                e3: le_i32(&d[8..]),
                e4: le_i32(&d[12..]),
            };
            true
        }
        _ => false,
    }
}

/// Parse a version report payload
pub fn parse_version(d: &[u8]) -> Option<Version> {
    if d.len() < 2 {
        return None;
    }
    Some(Version {
        major: d[0],
        minor: d[1],
    })
}
