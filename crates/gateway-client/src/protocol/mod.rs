//! Gateway protocol definitions
//!
//! Op codes, the JSON envelope, control payloads and close-code classification.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{CloseClass, CloseCodeTable, GatewayCloseCode};
pub use messages::Envelope;
pub use opcodes::OpCode;
pub use payloads::{HelloPayload, IdentifyPayload, IdentifyProperties, PresencePayload, ResumePayload};
