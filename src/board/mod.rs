//! Motor/IMU controller board driver.
//!
//! `BoardDriver` owns the serial handle for its whole lifetime. The port is
//! shared between the caller's command path (writes) and an internal reader
//! thread (reads) through a mutex; critical sections are a single bounded
//! read or one frame write, so neither side can starve the other. The
//! reader folds unsolicited reports into a `States` snapshot that
//! `snapshot()` copies out.
//!
//! The board is a mandatory resource: if it cannot be opened within the
//! retry budget, or a command write fails after connect, the caller is
//! expected to shut the process down.

pub mod protocol;
pub mod reader;

use crate::core::types::{MotorCommands, States};
use crate::error::{Error, Result};
use crate::transport::{SerialTransport, Transport};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Connect retry backoff: 200 ms doubling to a 1 s cap, 5 s total budget
const RETRY_DELAYS_MS: [u64; 4] = [200, 400, 800, 1000];
const RETRY_BUDGET: Duration = Duration::from_secs(5);

/// Driver for the serial-attached controller board
pub struct BoardDriver {
    port: Arc<Mutex<Box<dyn Transport>>>,
    state: Arc<Mutex<States>>,
    shutdown: Arc<AtomicBool>,
    reader_handle: Option<JoinHandle<()>>,
}

impl BoardDriver {
    /// Open the board with a bounded retry schedule.
    ///
    /// Returns the last open error once the 5 s budget is exhausted.
    pub fn connect(device: &str, baud: u32) -> Result<Self> {
        let started = Instant::now();
        let mut delays = RETRY_DELAYS_MS
            .iter()
            .copied()
            .chain(std::iter::repeat(1000));

        loop {
            match SerialTransport::open(device, baud) {
                Ok(t) => return Ok(Self::with_transport(Box::new(t))),
                Err(e) => {
                    let delay = Duration::from_millis(delays.next().unwrap_or(1000));
                    if started.elapsed() + delay > RETRY_BUDGET {
                        log::error!("Giving up on {}: {}", device, e);
                        return Err(e);
                    }
                    log::warn!("Open {} failed ({}), retrying in {:?}", device, e, delay);
                    thread::sleep(delay);
                }
            }
        }
    }

    /// Wrap an already-open transport (tests use this with a mock)
    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        Self {
            port: Arc::new(Mutex::new(transport)),
            state: Arc::new(Mutex::new(States::default())),
            shutdown: Arc::new(AtomicBool::new(false)),
            reader_handle: None,
        }
    }

    /// Start the background reader thread
    pub fn start(&mut self) -> Result<()> {
        if self.reader_handle.is_some() {
            return Ok(());
        }

        let port = Arc::clone(&self.port);
        let shutdown = Arc::clone(&self.shutdown);
        let state = Arc::clone(&self.state);

        self.reader_handle = Some(
            thread::Builder::new()
                .name("board-reader".to_string())
                .spawn(move || reader_loop_entry(port, shutdown, state))
                .map_err(|e| Error::Other(format!("Failed to spawn reader thread: {}", e)))?,
        );

        Ok(())
    }

    fn send(&self, frame: &[u8]) -> Result<()> {
        let mut port = self.port.lock();
        port.write_all(frame)
    }

    /// Apply four motor values (clamped at the protocol layer)
    pub fn set_motor(&self, m: MotorCommands) -> Result<()> {
        self.send(&protocol::cmd_motor(m))
    }

    /// Sound the buzzer for `on_time_ms` milliseconds
    pub fn set_beep(&self, on_time_ms: u16) -> Result<()> {
        self.send(&protocol::cmd_beep(on_time_ms))
    }

    /// Enable or disable unsolicited sensor reports
    pub fn set_auto_report(&self, enable: bool, forever: bool) -> Result<()> {
        self.send(&protocol::cmd_auto_report(enable, forever))
    }

    /// Ask the board to report its firmware version (reply is logged)
    pub fn request_version(&self) -> Result<()> {
        self.send(&protocol::cmd_request_data(protocol::FUNC_VERSION, 0))
    }

    /// Copy of the latest sensor snapshot
    pub fn snapshot(&self) -> States {
        *self.state.lock()
    }

    /// Stop the reader thread and release the port.
    ///
    /// Idempotent; also runs on drop so the port is released on any exit
    /// path, including unwinds.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader_handle.take() {
            let _ = handle.join();
        }
    }
}

fn reader_loop_entry(
    port: Arc<Mutex<Box<dyn Transport>>>,
    shutdown: Arc<AtomicBool>,
    state: Arc<Mutex<States>>,
) {
    reader::reader_loop(port, shutdown, state);
}

impl Drop for BoardDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn test_commands_reach_the_wire() {
        let mock = MockTransport::new();
        let driver = BoardDriver::with_transport(Box::new(mock.clone()));

        driver
            .set_motor(MotorCommands {
                m1: 1,
                m2: 2,
                m3: 3,
                m4: 4,
            })
            .unwrap();
        driver.set_beep(100).unwrap();

        let written = mock.written();
        let motor = protocol::cmd_motor(MotorCommands {
            m1: 1,
            m2: 2,
            m3: 3,
            m4: 4,
        });
        assert_eq!(&written[..motor.len()], &motor[..]);
        assert_eq!(&written[motor.len()..], &protocol::cmd_beep(100)[..]);
    }

    #[test]
    fn test_write_failure_propagates() {
        let mock = MockTransport::new();
        mock.fail_writes(true);
        let driver = BoardDriver::with_transport(Box::new(mock));
        assert!(driver.set_motor(MotorCommands::ZERO).is_err());
    }

    #[test]
    fn test_reader_updates_snapshot() {
        let mock = MockTransport::new();

        // Encoder report frame
        let mut payload = Vec::new();
        for v in [10i32, 20, 30, 40] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        let ext_len = (payload.len() + 3) as u8;
        let mut frame = vec![protocol::HEAD, protocol::RESPONSE_ID, ext_len, 0x0D];
        frame.extend_from_slice(&payload);
        let sum = payload
            .iter()
            .fold(ext_len as u32 + 0x0Du32, |s, &b| s + b as u32);
        frame.push((sum & 0xFF) as u8);
        mock.inject_read(&frame);

        let mut driver = BoardDriver::with_transport(Box::new(mock));
        driver.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        loop {
            let st = driver.snapshot();
            if st.enc.e1 == 10 {
                assert_eq!(st.enc.e4, 40);
                break;
            }
            assert!(Instant::now() < deadline, "reader never parsed the frame");
            thread::sleep(Duration::from_millis(5));
        }
        driver.shutdown();
    }
}
