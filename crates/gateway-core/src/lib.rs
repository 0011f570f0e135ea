//! # gateway-core
//!
//! Value objects shared by the gateway client crates: snowflake identifiers
//! and the intents capability mask sent during Identify.
//! This crate has no dependencies on I/O or the async runtime.

pub mod value_objects;

// Re-export commonly used types at crate root
pub use value_objects::{Intents, Snowflake, SnowflakeParseError};
