//! Integration test utilities for the gateway client
//!
//! Scripted transports and a recording REST executor drive the full runtime
//! loop under a paused clock; [`FakeGateway`] serves real frames over a local
//! socket for the production transport.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
