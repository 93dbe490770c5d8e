//! Long-lived worker loops.
//!
//! One OS thread per worker, all communicating exclusively through
//! [`crate::shared::SharedState`] and stopping on the shared
//! [`crate::sync::StopFlag`]. No worker holds a reference to another.

pub mod controller;
pub mod log;
pub mod tcp;
pub mod usb;

pub use controller::ControllerWorker;
pub use log::LogWorker;
pub use tcp::TcpWorker;
pub use usb::UsbWorker;
