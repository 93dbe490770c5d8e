//! Stream-safe framing for the TCP protocol.
//!
//! Every message is a 3-byte header followed by `len` payload bytes:
//!
//! ```text
//! type: u8   // message type
//! ver:  u8   // protocol version, currently 1
//! len:  u8   // payload length 0..255
//! ```
//!
//! The decoder resyncs by dropping one byte whenever the version is wrong,
//! the type is unknown, or a body-carrying type declares a zero-length
//! payload. A bounded buffer protects against junk floods.

pub const MSG_VER: u8 = 1;
pub const HEADER_SIZE: usize = 3;

/// Message types on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    State = 1,
    Cmd = 2,
    Setpoint = 3,
    Config = 4,
    StatsReq = 5,
    StatsResp = 6,
}

impl MsgType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(MsgType::State),
            2 => Some(MsgType::Cmd),
            3 => Some(MsgType::Setpoint),
            4 => Some(MsgType::Config),
            5 => Some(MsgType::StatsReq),
            6 => Some(MsgType::StatsResp),
            _ => None,
        }
    }

    /// Types whose payload may never be empty
    fn requires_payload(self) -> bool {
        matches!(
            self,
            MsgType::Cmd | MsgType::Setpoint | MsgType::Config | MsgType::StatsResp
        )
    }
}

/// Build a frame header
pub fn encode_header(ty: MsgType, payload_len: u8) -> [u8; HEADER_SIZE] {
    [ty as u8, MSG_VER, payload_len]
}

/// Stream decoder for header+payload frames.
///
/// Keeps a read cursor and compacts occasionally instead of shifting the
/// buffer on every frame; enforces a hard cap against junk streams.
#[derive(Default)]
pub struct FrameRx {
    buf: Vec<u8>,
    read_pos: usize,
}

/// Hard cap on buffered bytes; beyond this the buffer is reset
const MAX_BUFFER_BYTES: usize = 64 * 1024;
/// Compact once the consumed prefix exceeds this
const COMPACT_THRESHOLD: usize = 4096;

impl FrameRx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the socket
    pub fn push_bytes(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        if self.available() + data.len() > MAX_BUFFER_BYTES {
            self.clear();
            // keep only the tail that fits
            let data = if data.len() > MAX_BUFFER_BYTES {
                &data[data.len() - MAX_BUFFER_BYTES..]
            } else {
                data
            };
            self.buf.extend_from_slice(data);
            return;
        }

        self.buf.extend_from_slice(data);
    }

    /// Extract the next complete frame as `(type, payload)`.
    ///
    /// Invalid header bytes are skipped one at a time, so a valid frame
    /// embedded in arbitrary junk is always recovered.
    pub fn pop(&mut self) -> Option<(MsgType, Vec<u8>)> {
        loop {
            if self.available() < HEADER_SIZE {
                self.maybe_compact();
                return None;
            }

            let h = &self.buf[self.read_pos..];
            let ver = h[1];
            let len = h[2] as usize;

            let ty = match MsgType::from_u8(h[0]) {
                Some(ty) if ver == MSG_VER => ty,
                _ => {
                    self.read_pos += 1;
                    continue;
                }
            };

            if len == 0 && ty.requires_payload() {
                self.read_pos += 1;
                continue;
            }

            let total = HEADER_SIZE + len;
            if self.available() < total {
                self.maybe_compact();
                return None;
            }

            let start = self.read_pos + HEADER_SIZE;
            let payload = self.buf[start..start + len].to_vec();
            self.read_pos += total;
            self.maybe_compact();
            return Some((ty, payload));
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.read_pos = 0;
    }

    fn available(&self) -> usize {
        self.buf.len() - self.read_pos
    }

    fn maybe_compact(&mut self) {
        if self.read_pos == self.buf.len() {
            self.clear();
        } else if self.read_pos >= COMPACT_THRESHOLD && self.read_pos > self.buf.len() / 2 {
            self.buf.drain(..self.read_pos);
            self.read_pos = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ty: MsgType, payload: &[u8]) -> Vec<u8> {
        let mut f = encode_header(ty, payload.len() as u8).to_vec();
        f.extend_from_slice(payload);
        f
    }

    #[test]
    fn test_single_frame() {
        let mut rx = FrameRx::new();
        rx.push_bytes(&frame(MsgType::Cmd, &[1; 14]));
        let (ty, payload) = rx.pop().unwrap();
        assert_eq!(ty, MsgType::Cmd);
        assert_eq!(payload.len(), 14);
        assert!(rx.pop().is_none());
    }

    #[test]
    fn test_partial_then_complete() {
        let mut rx = FrameRx::new();
        let f = frame(MsgType::Setpoint, &[2; 21]);
        rx.push_bytes(&f[..5]);
        assert!(rx.pop().is_none());
        rx.push_bytes(&f[5..]);
        assert!(rx.pop().is_some());
    }

    #[test]
    fn test_resync_through_arbitrary_junk() {
        let mut rx = FrameRx::new();
        let mut stream = vec![0xDE, 0xAD, 0x00, 0x09, 0xFF];
        stream.extend_from_slice(&frame(MsgType::Cmd, &[7; 14]));
        stream.extend_from_slice(&[0x42, 0x42]);
        stream.extend_from_slice(&frame(MsgType::Config, &[8; 12]));
        rx.push_bytes(&stream);

        let (ty, payload) = rx.pop().unwrap();
        assert_eq!(ty, MsgType::Cmd);
        assert_eq!(payload, vec![7; 14]);
        let (ty, payload) = rx.pop().unwrap();
        assert_eq!(ty, MsgType::Config);
        assert_eq!(payload, vec![8; 12]);
    }

    #[test]
    fn test_wrong_version_skipped() {
        let mut rx = FrameRx::new();
        let mut bad = frame(MsgType::Cmd, &[1; 14]);
        bad[1] = 2; // future version
        rx.push_bytes(&bad);
        rx.push_bytes(&frame(MsgType::StatsReq, &[]));
        let (ty, payload) = rx.pop().unwrap();
        assert_eq!(ty, MsgType::StatsReq);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_zero_length_body_types_rejected() {
        let mut rx = FrameRx::new();
        rx.push_bytes(&encode_header(MsgType::Cmd, 0));
        rx.push_bytes(&frame(MsgType::Cmd, &[3; 14]));
        let (ty, payload) = rx.pop().unwrap();
        assert_eq!(ty, MsgType::Cmd);
        assert_eq!(payload, vec![3; 14]);
    }

    #[test]
    fn test_stats_request_may_be_empty() {
        let mut rx = FrameRx::new();
        rx.push_bytes(&encode_header(MsgType::StatsReq, 0));
        assert_eq!(rx.pop().unwrap().0, MsgType::StatsReq);
    }

    #[test]
    fn test_flood_resets_buffer() {
        let mut rx = FrameRx::new();
        // No valid frames in sight: buffer must stay bounded
        let junk = vec![0u8; 16 * 1024];
        for _ in 0..8 {
            rx.push_bytes(&junk);
            while rx.pop().is_some() {}
        }
        assert!(rx.buf.len() <= MAX_BUFFER_BYTES);

        // and the decoder still works afterwards
        rx.push_bytes(&frame(MsgType::Cmd, &[1; 14]));
        assert!(rx.pop().is_some());
    }
}
