//! Heartbeat timer

mod heartbeat_timer;

pub use heartbeat_timer::{HeartbeatTimer, TimerSlot};
