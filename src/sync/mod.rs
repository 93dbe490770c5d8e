//! Lock-free and low-contention primitives the workers share state through

pub mod mailbox;
pub mod rate;
pub mod ring;
pub mod stop;

pub use mailbox::Mailbox;
pub use rate::RateLimiter;
pub use ring::OverwriteRing;
pub use stop::StopFlag;
