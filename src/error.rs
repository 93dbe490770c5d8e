//! Error types for RoverD
//!
//! # Error Recovery Strategies
//!
//! Different error types require different recovery approaches:
//!
//! ## Fatal Errors (Terminate the Daemon)
//!
//! - **`Serial`** during connect, and any write failure after connect: the
//!   board is mandatory. The USB worker raises the stop flag and the process
//!   exits nonzero.
//!
//! - **`Bind`**: a TCP listener could not be bound. Another process owns the
//!   port or the address is wrong; fix and restart.
//!
//! ## Transient Errors (Absorbed Locally)
//!
//! - **`Io`** with `WouldBlock`/`TimedOut` kinds never reaches callers; the
//!   transport maps them to zero-byte reads and the worker retries on its
//!   next cycle.
//!
//! ## Protocol Errors (Count and Resync)
//!
//! - Malformed TCP frames bump `tcp_frames_bad` and the stream is resynced
//!   one byte at a time. Malformed serial frames are dropped the same way.
//!   Neither produces an `Error` value; counters make the loss observable.

use thiserror::Error;

/// Errors that can occur in RoverD
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind {0}")]
    Bind(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
