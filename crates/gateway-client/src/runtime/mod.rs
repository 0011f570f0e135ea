//! Runtime loop tying transport, session, timers and router together

mod client;

pub use client::{ExitReason, GatewayClient, NORMAL_CLOSURE, POLL_INTERVAL, RECONNECT_CLOSURE};
