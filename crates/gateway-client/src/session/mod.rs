//! Connection lifecycle and session state

mod backoff;
mod machine;
mod state;

pub use backoff::Backoff;
pub use machine::{HelloReply, SessionMachine, Transition};
pub use state::{RunState, SessionState};
