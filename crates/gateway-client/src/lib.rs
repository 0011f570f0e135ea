//! # gateway-client
//!
//! Persistent client for a real-time event gateway: frame codec, session
//! state machine, heartbeats, outbound rate limiting, event routing and the
//! runtime loop that reconnects and resumes after failures.

pub mod codec;
pub mod control;
pub mod error;
pub mod events;
pub mod notify;
pub mod protocol;
pub mod ratelimit;
pub mod rest;
pub mod runtime;
pub mod session;
pub mod timing;
pub mod transport;

pub use error::ClientError;
pub use events::{EventHandler, EventRouter, GatewayEvent};
pub use runtime::{ExitReason, GatewayClient};
pub use session::{RunState, SessionState};
