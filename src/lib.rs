//! RoverD - Gateway daemon for a four-motor robot controller board
//!
//! This library provides the building blocks of the gateway: the serial
//! board driver, the framed TCP protocol, the shared state the workers
//! communicate through, and the rotating binary flight log.

pub mod binlog;
pub mod board;
pub mod config;
pub mod core;
pub mod error;
pub mod shared;
pub mod sync;
pub mod transport;
pub mod wire;
pub mod workers;

// Re-export commonly used types
pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use shared::SharedState;
