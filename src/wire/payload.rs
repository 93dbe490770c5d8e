//! Fixed-layout payload codecs.
//!
//! All multi-byte fields are little-endian; floats are IEEE-754 binary32
//! transmitted as their raw bit pattern. Nothing here relies on struct
//! memory layout, so external clients in any language can decode the
//! stream. Decoders reject payloads whose length does not match the
//! declared type exactly; there are no partial parses.

use crate::core::types::{Actions, Encoders, MotorCommands, States, Vec3};

// ---- little-endian cursor helpers ----

#[inline]
fn put_u8(b: &mut [u8], o: &mut usize, v: u8) {
    b[*o] = v;
    *o += 1;
}

#[inline]
fn put_u16(b: &mut [u8], o: &mut usize, v: u16) {
    b[*o..*o + 2].copy_from_slice(&v.to_le_bytes());
    *o += 2;
}

#[inline]
fn put_i16(b: &mut [u8], o: &mut usize, v: i16) {
    put_u16(b, o, v as u16);
}

#[inline]
fn put_u32(b: &mut [u8], o: &mut usize, v: u32) {
    b[*o..*o + 4].copy_from_slice(&v.to_le_bytes());
    *o += 4;
}

#[inline]
fn put_i32(b: &mut [u8], o: &mut usize, v: i32) {
    put_u32(b, o, v as u32);
}

#[inline]
fn put_f32(b: &mut [u8], o: &mut usize, v: f32) {
    put_u32(b, o, v.to_bits());
}

#[inline]
fn get_u8(b: &[u8], o: &mut usize) -> u8 {
    let v = b[*o];
    *o += 1;
    v
}

#[inline]
fn get_u16(b: &[u8], o: &mut usize) -> u16 {
    let v = u16::from_le_bytes([b[*o], b[*o + 1]]);
    *o += 2;
    v
}

#[inline]
fn get_i16(b: &[u8], o: &mut usize) -> i16 {
    get_u16(b, o) as i16
}

#[inline]
fn get_u32(b: &[u8], o: &mut usize) -> u32 {
    let v = u32::from_le_bytes([b[*o], b[*o + 1], b[*o + 2], b[*o + 3]]);
    *o += 4;
    v
}

#[inline]
fn get_i32(b: &[u8], o: &mut usize) -> i32 {
    get_u32(b, o) as i32
}

#[inline]
fn get_f32(b: &[u8], o: &mut usize) -> f32 {
    f32::from_bits(get_u32(b, o))
}

/// Serialized width of a [`States`] block (9 IMU + 3 angle + 1 battery
/// floats, 4 encoder i32s)
pub(crate) const STATES_SIZE: usize = 68;

/// Write a `States` block at the cursor (shared by the TCP codec and the
/// binary log)
pub(crate) fn put_states(b: &mut [u8], o: &mut usize, st: &States) {
    for v in [st.imu.acc, st.imu.gyro, st.imu.mag] {
        put_f32(b, o, v.x);
        put_f32(b, o, v.y);
        put_f32(b, o, v.z);
    }
    put_f32(b, o, st.ang.roll);
    put_f32(b, o, st.ang.pitch);
    put_f32(b, o, st.ang.yaw);
    put_i32(b, o, st.enc.e1);
    put_i32(b, o, st.enc.e2);
    put_i32(b, o, st.enc.e3);
    put_i32(b, o, st.enc.e4);
    put_f32(b, o, st.battery_voltage);
}

/// Read a `States` block at the cursor
pub(crate) fn get_states(b: &[u8], o: &mut usize) -> States {
    let mut vecs = [Vec3::default(); 3];
    for v in &mut vecs {
        *v = Vec3::new(get_f32(b, o), get_f32(b, o), get_f32(b, o));
    }
    let mut st = States {
        imu: crate::core::types::Imu {
            acc: vecs[0],
            gyro: vecs[1],
            mag: vecs[2],
        },
        ..Default::default()
    };
    st.ang.roll = get_f32(b, o);
    st.ang.pitch = get_f32(b, o);
    st.ang.yaw = get_f32(b, o);
    st.enc = Encoders {
        e1: get_i32(b, o),
        e2: get_i32(b, o),
        e3: get_i32(b, o),
        e4: get_i32(b, o),
    };
    st.battery_voltage = get_f32(b, o);
    st
}

// ---- STATE ----

/// Sensor snapshot broadcast to state clients
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatePayload {
    pub seq: u32,
    pub t_mono_s: f32,
    pub st: States,
}

impl StatePayload {
    pub const SIZE: usize = 76;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        let o = &mut 0;
        put_u32(&mut b, o, self.seq);
        put_f32(&mut b, o, self.t_mono_s);
        put_states(&mut b, o, &self.st);
        debug_assert_eq!(*o, Self::SIZE);
        b
    }

    pub fn decode(b: &[u8]) -> Option<Self> {
        if b.len() != Self::SIZE {
            return None;
        }
        let o = &mut 0;
        let seq = get_u32(b, o);
        let t_mono_s = get_f32(b, o);
        let st = get_states(b, o);
        Some(Self { seq, t_mono_s, st })
    }
}

// ---- CMD ----

/// Remote command bundle: sequence number plus one [`Actions`] value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmdPayload {
    pub seq: u32,
    pub actions: Actions,
}

impl CmdPayload {
    pub const SIZE: usize = 14;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        let o = &mut 0;
        put_u32(&mut b, o, self.seq);
        put_i16(&mut b, o, self.actions.motors.m1);
        put_i16(&mut b, o, self.actions.motors.m2);
        put_i16(&mut b, o, self.actions.motors.m3);
        put_i16(&mut b, o, self.actions.motors.m4);
        put_u8(&mut b, o, self.actions.beep_ms);
        put_u8(&mut b, o, self.actions.flags);
        b
    }

    pub fn decode(b: &[u8]) -> Option<Self> {
        if b.len() != Self::SIZE {
            return None;
        }
        let o = &mut 0;
        Some(Self {
            seq: get_u32(b, o),
            actions: Actions {
                motors: MotorCommands {
                    m1: get_i16(b, o),
                    m2: get_i16(b, o),
                    m3: get_i16(b, o),
                    m4: get_i16(b, o),
                },
                beep_ms: get_u8(b, o),
                flags: get_u8(b, o),
            },
        })
    }
}

// ---- SETPOINT ----

/// Latest-wins setpoint for the autonomous controller hook
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SetpointPayload {
    pub seq: u32,
    pub sp: [f32; 4],
    pub flags: u8,
}

impl SetpointPayload {
    pub const SIZE: usize = 21;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        let o = &mut 0;
        put_u32(&mut b, o, self.seq);
        for v in self.sp {
            put_f32(&mut b, o, v);
        }
        put_u8(&mut b, o, self.flags);
        b
    }

    pub fn decode(b: &[u8]) -> Option<Self> {
        if b.len() != Self::SIZE {
            return None;
        }
        let o = &mut 0;
        let seq = get_u32(b, o);
        let mut sp = [0f32; 4];
        for v in &mut sp {
            *v = get_f32(b, o);
        }
        let flags = get_u8(b, o);
        Some(Self { seq, sp, flags })
    }
}

// ---- CONFIG ----

/// Single-field hot-reload request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigPayload {
    pub seq: u32,
    pub key: u8,
    pub v_u8: u8,
    pub v_u16: u16,
    pub v_u32: u32,
}

impl ConfigPayload {
    pub const SIZE: usize = 12;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        let o = &mut 0;
        put_u32(&mut b, o, self.seq);
        put_u8(&mut b, o, self.key);
        put_u8(&mut b, o, self.v_u8);
        put_u16(&mut b, o, self.v_u16);
        put_u32(&mut b, o, self.v_u32);
        b
    }

    pub fn decode(b: &[u8]) -> Option<Self> {
        if b.len() != Self::SIZE {
            return None;
        }
        let o = &mut 0;
        Some(Self {
            seq: get_u32(b, o),
            key: get_u8(b, o),
            v_u8: get_u8(b, o),
            v_u16: get_u16(b, o),
            v_u32: get_u32(b, o),
        })
    }
}

// ---- STATS ----

/// Diagnostics snapshot returned for a stats request
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsPayload {
    pub seq: u32,
    pub uptime_ms: u32,
    pub usb_hz: f32,
    pub tcp_hz: f32,
    pub ctrl_hz: f32,
    pub drops_state: u32,
    pub drops_cmd: u32,
    pub drops_event: u32,
    pub drops_sys_event: u32,
    pub tcp_frames_bad: u32,
    pub serial_errors: u32,
    pub reserved: u32,
}

impl StatsPayload {
    pub const SIZE: usize = 48;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        let o = &mut 0;
        put_u32(&mut b, o, self.seq);
        put_u32(&mut b, o, self.uptime_ms);
        put_f32(&mut b, o, self.usb_hz);
        put_f32(&mut b, o, self.tcp_hz);
        put_f32(&mut b, o, self.ctrl_hz);
        put_u32(&mut b, o, self.drops_state);
        put_u32(&mut b, o, self.drops_cmd);
        put_u32(&mut b, o, self.drops_event);
        put_u32(&mut b, o, self.drops_sys_event);
        put_u32(&mut b, o, self.tcp_frames_bad);
        put_u32(&mut b, o, self.serial_errors);
        put_u32(&mut b, o, self.reserved);
        debug_assert_eq!(*o, Self::SIZE);
        b
    }

    pub fn decode(b: &[u8]) -> Option<Self> {
        if b.len() != Self::SIZE {
            return None;
        }
        let o = &mut 0;
        Some(Self {
            seq: get_u32(b, o),
            uptime_ms: get_u32(b, o),
            usb_hz: get_f32(b, o),
            tcp_hz: get_f32(b, o),
            ctrl_hz: get_f32(b, o),
            drops_state: get_u32(b, o),
            drops_cmd: get_u32(b, o),
            drops_event: get_u32(b, o),
            drops_sys_event: get_u32(b, o),
            tcp_frames_bad: get_u32(b, o),
            serial_errors: get_u32(b, o),
            reserved: get_u32(b, o),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Imu;

    #[test]
    fn test_cmd_known_bytes() {
        let p = CmdPayload {
            seq: 0x0403_0201,
            actions: Actions {
                motors: MotorCommands {
                    m1: -10,
                    m2: 20,
                    m3: 30,
                    m4: 40,
                },
                beep_ms: 0,
                flags: 0,
            },
        };
        let bytes = p.encode();
        assert_eq!(
            &bytes[..12],
            &[0x01, 0x02, 0x03, 0x04, 0xF6, 0xFF, 0x14, 0x00, 0x1E, 0x00, 0x28, 0x00]
        );
        assert_eq!(&bytes[12..], &[0, 0]);
        assert_eq!(CmdPayload::decode(&bytes), Some(p));
    }

    #[test]
    fn test_cmd_roundtrip_with_oneshots() {
        let p = CmdPayload {
            seq: 7,
            actions: Actions {
                motors: MotorCommands {
                    m1: -100,
                    m2: 100,
                    m3: 127,
                    m4: 0,
                },
                beep_ms: 50,
                flags: 0b0000_0101,
            },
        };
        assert_eq!(CmdPayload::decode(&p.encode()), Some(p));
    }

    #[test]
    fn test_setpoint_roundtrip() {
        let p = SetpointPayload {
            seq: 42,
            sp: [1.5, -2.25, 0.0, 1e6],
            flags: 0x81,
        };
        assert_eq!(SetpointPayload::decode(&p.encode()), Some(p));
    }

    #[test]
    fn test_config_roundtrip() {
        let p = ConfigPayload {
            seq: 9,
            key: 4,
            v_u8: 1,
            v_u16: 250,
            v_u32: 0xDEAD_BEEF,
        };
        assert_eq!(ConfigPayload::decode(&p.encode()), Some(p));
    }

    #[test]
    fn test_stats_roundtrip() {
        let p = StatsPayload {
            seq: 1,
            uptime_ms: 123_456,
            usb_hz: 200.0,
            tcp_hz: 100.0,
            ctrl_hz: 200.0,
            drops_state: 5,
            drops_cmd: 0,
            drops_event: 1,
            drops_sys_event: 2,
            tcp_frames_bad: 3,
            serial_errors: 0,
            reserved: 0,
        };
        assert_eq!(StatsPayload::decode(&p.encode()), Some(p));
    }

    #[test]
    fn test_state_layout_and_roundtrip() {
        let p = StatePayload {
            seq: 100,
            t_mono_s: 1.25,
            st: States {
                imu: Imu {
                    acc: Vec3::new(0.1, 0.2, 0.3),
                    gyro: Vec3::new(-0.1, -0.2, -0.3),
                    mag: Vec3::new(10.0, 20.0, 30.0),
                },
                ang: crate::core::types::Angles {
                    roll: 0.5,
                    pitch: -0.5,
                    yaw: 3.0,
                },
                enc: Encoders {
                    e1: 1,
                    e2: -2,
                    e3: 3,
                    e4: -4,
                },
                battery_voltage: 12.4,
            },
        };
        let bytes = p.encode();
        assert_eq!(bytes.len(), 76);
        // seq and t_mono at the front, battery at the back
        assert_eq!(&bytes[..4], &100u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1.25f32.to_le_bytes());
        assert_eq!(&bytes[72..], &12.4f32.to_le_bytes());
        assert_eq!(StatePayload::decode(&bytes), Some(p));
    }

    #[test]
    fn test_wrong_size_rejected() {
        assert_eq!(CmdPayload::decode(&[0; 12]), None);
        assert_eq!(CmdPayload::decode(&[0; 15]), None);
        assert_eq!(SetpointPayload::decode(&[0; 20]), None);
        assert_eq!(ConfigPayload::decode(&[0; 13]), None);
        assert_eq!(StatsPayload::decode(&[0; 47]), None);
        assert_eq!(StatePayload::decode(&[0; 75]), None);
    }
}
