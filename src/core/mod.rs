//! Core data types shared by every worker

pub mod time;
pub mod types;

pub use time::Timestamps;
pub use types::{
    Actions, Angles, ControlMode, Encoders, EventCmd, EventSample, EventType, Imu, MotorCmdSample,
    MotorCommands, StateSample, States, SystemState, Vec3,
};
