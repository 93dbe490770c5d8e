//! Board response stream parsing and the reader thread.
//!
//! The board emits unsolicited report frames once auto-reporting is enabled.
//! `FrameParser` reassembles them from the raw byte stream; `reader_loop`
//! runs on a dedicated thread, feeding the parser from the serial port and
//! folding verified reports into the shared sensor snapshot.

use super::protocol::{self, FUNC_VERSION, HEAD, RESPONSE_ID};
use crate::core::types::States;
use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Longest data section the board ever sends; anything larger is junk
const MAX_DATA_LEN: usize = 200;

/// Cap on buffered unparsed bytes; a stream with no sync bytes is dropped
const MAX_BUFFER_SIZE: usize = 4096;

/// Incremental parser for board response frames.
///
/// Frames: `[0xFF] [0xFB] [EXT_LEN] [EXT_TYPE] [data..] [RX_CHECK]` where
/// `EXT_LEN - 2` bytes follow `EXT_TYPE` (checksum included). Any
/// verification failure drops a single byte and rescans, so one corrupt
/// byte costs at most one frame.
#[derive(Default)]
pub struct FrameParser {
    buf: Vec<u8>,
    bad_frames: u64,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(512),
            bad_frames: 0,
        }
    }

    /// Append raw bytes from the transport
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_BUFFER_SIZE && !self.buf.contains(&HEAD) {
            self.buf.clear();
        }
    }

    /// Frames that failed verification so far
    pub fn bad_frames(&self) -> u64 {
        self.bad_frames
    }

    /// Extract the next verified frame as `(ext_type, payload)`.
    ///
    /// The payload excludes the trailing checksum byte. Returns `None` when
    /// the buffer holds no complete frame yet.
    pub fn next_frame(&mut self) -> Option<(u8, Vec<u8>)> {
        loop {
            if self.buf.len() < 4 {
                return None;
            }

            if self.buf[0] != HEAD || self.buf[1] != RESPONSE_ID {
                self.buf.remove(0);
                continue;
            }

            let ext_len = self.buf[2] as usize;
            let ext_type = self.buf[3];

            // data section = payload + checksum byte
            let data_len = match ext_len.checked_sub(2) {
                Some(n) if (1..=MAX_DATA_LEN).contains(&n) => n,
                _ => {
                    self.bad_frames += 1;
                    self.buf.remove(0);
                    continue;
                }
            };

            let total = 4 + data_len;
            if self.buf.len() < total {
                return None;
            }

            let data = &self.buf[4..total];
            let rx_check = data[data_len - 1];
            let sum = data[..data_len - 1]
                .iter()
                .fold(ext_len as u32 + ext_type as u32, |s, &b| s + b as u32);

            if (sum & 0xFF) as u8 != rx_check {
                self.bad_frames += 1;
                self.buf.remove(0);
                continue;
            }

            let payload = data[..data_len - 1].to_vec();
            self.buf.drain(..total);
            return Some((ext_type, payload));
        }
    }
}

/// Reader loop - parses report frames and updates the shared snapshot.
///
/// Runs until the shutdown flag is set. The port lock is held only for the
/// duration of one bounded read so the command path is never starved.
pub(super) fn reader_loop(
    port: Arc<Mutex<Box<dyn Transport>>>,
    shutdown: Arc<AtomicBool>,
    state: Arc<Mutex<States>>,
) {
    let mut parser = FrameParser::new();
    let mut version_logged = false;
    let mut last_bad = 0u64;

    while !shutdown.load(Ordering::Relaxed) {
        let mut chunk = [0u8; 256];
        let n = {
            let mut port = port.lock();
            match port.read(&mut chunk) {
                Ok(n) => n,
                Err(e) => {
                    log::error!("Board read error: {}", e);
                    drop(port);
                    thread::sleep(Duration::from_millis(10));
                    continue;
                }
            }
        };

        if n == 0 {
            // Timeout with nothing buffered; yield before polling again
            thread::sleep(Duration::from_millis(1));
            continue;
        }

        parser.push(&chunk[..n]);

        while let Some((ext_type, payload)) = parser.next_frame() {
            if ext_type == FUNC_VERSION {
                if !version_logged
                    && let Some(v) = protocol::parse_version(&payload)
                {
                    log::info!("Board firmware version {}.{}", v.major, v.minor);
                    version_logged = true;
                }
                continue;
            }

            let mut st = state.lock();
            protocol::apply_report(ext_type, &payload, &mut st);
        }

        let bad = parser.bad_frames();
        if bad != last_bad {
            log::debug!("Board frame checksum failures: {}", bad);
            last_bad = bad;
        }
    }

    log::info!("Board reader thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a valid response frame around `payload`
    fn rx_frame(ext_type: u8, payload: &[u8]) -> Vec<u8> {
        let ext_len = (payload.len() + 3) as u8;
        let mut f = vec![HEAD, RESPONSE_ID, ext_len, ext_type];
        f.extend_from_slice(payload);
        let sum = payload
            .iter()
            .fold(ext_len as u32 + ext_type as u32, |s, &b| s + b as u32);
        f.push((sum & 0xFF) as u8);
        f
    }

    #[test]
    fn test_parses_single_frame() {
        let mut p = FrameParser::new();
        p.push(&rx_frame(0x0D, &[1, 2, 3, 4]));
        let (ty, payload) = p.next_frame().unwrap();
        assert_eq!(ty, 0x0D);
        assert_eq!(payload, vec![1, 2, 3, 4]);
        assert_eq!(p.next_frame(), None);
        assert_eq!(p.bad_frames(), 0);
    }

    #[test]
    fn test_partial_frame_waits_for_more_bytes() {
        let mut p = FrameParser::new();
        let frame = rx_frame(0x0B, &[9; 18]);
        p.push(&frame[..10]);
        assert_eq!(p.next_frame(), None);
        p.push(&frame[10..]);
        assert!(p.next_frame().is_some());
    }

    #[test]
    fn test_resync_after_garbage_prefix() {
        let mut p = FrameParser::new();
        p.push(&[0x00, 0x42, 0xFF, 0x13]); // noise, including a lone head byte
        p.push(&rx_frame(0x0C, &[1, 2, 3, 4, 5, 6]));
        let (ty, payload) = p.next_frame().unwrap();
        assert_eq!(ty, 0x0C);
        assert_eq!(payload.len(), 6);
    }

    #[test]
    fn test_corrupt_checksum_drops_one_byte_and_recovers() {
        let mut p = FrameParser::new();
        let mut bad = rx_frame(0x0D, &[1, 2, 3, 4]);
        let last = bad.len() - 1;
        bad[last] ^= 0xA5;
        p.push(&bad);
        p.push(&rx_frame(0x0D, &[5, 6, 7, 8]));
        let (_, payload) = p.next_frame().unwrap();
        assert_eq!(payload, vec![5, 6, 7, 8]);
        assert!(p.bad_frames() >= 1);
    }

    #[test]
    fn test_injected_head_byte_recovers_next_frame() {
        // A stray 0xFF inserted mid-stream must cost at most the bytes
        // before the next valid frame, never corrupt a decoded value.
        let mut p = FrameParser::new();
        let mut stream = rx_frame(0x0D, &[1, 2, 3, 4]);
        stream.push(0xFF); // garbage byte between frames
        stream.extend_from_slice(&rx_frame(0x0D, &[5, 6, 7, 8]));
        p.push(&stream);
        assert_eq!(p.next_frame().unwrap().1, vec![1, 2, 3, 4]);
        assert_eq!(p.next_frame().unwrap().1, vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_junk_stream_is_bounded() {
        let mut p = FrameParser::new();
        for _ in 0..40 {
            p.push(&[0x11; 256]);
            assert_eq!(p.next_frame(), None);
        }
        assert!(p.buf.len() <= MAX_BUFFER_SIZE + 256);
    }
}
