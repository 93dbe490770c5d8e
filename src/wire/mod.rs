//! Framed TCP wire protocol shared with remote clients

pub mod frame;
pub mod payload;

pub use frame::{FrameRx, HEADER_SIZE, MsgType, encode_header};
pub use payload::{CmdPayload, ConfigPayload, SetpointPayload, StatePayload, StatsPayload};
