//! Gateway envelope format
//!
//! Every text frame carries exactly one envelope:
//! `{"op": <int>, "d": <payload|null>, "s": <int|null>, "t": <string|null>}`.

use super::{IdentifyPayload, OpCode, PresencePayload, ResumePayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One decoded gateway message
///
/// `op` stays a raw integer so that op codes this client does not know
/// still decode and can be routed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Operation code
    pub op: u8,

    /// Event data payload
    #[serde(default)]
    pub d: Value,

    /// Sequence number (only for op=0 Dispatch)
    #[serde(default)]
    pub s: Option<u64>,

    /// Event name (only for op=0 Dispatch)
    #[serde(default)]
    pub t: Option<String>,
}

impl Envelope {
    /// Create a control envelope with no sequence or event name
    #[must_use]
    pub fn new(op: OpCode, d: Value) -> Self {
        Self {
            op: op.as_u8(),
            d,
            s: None,
            t: None,
        }
    }

    /// Create a Dispatch envelope (op=0)
    #[must_use]
    pub fn dispatch(event_name: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch.as_u8(),
            d: data,
            s: Some(sequence),
            t: Some(event_name.into()),
        }
    }

    /// Create an Identify envelope (op=2)
    pub fn identify(payload: &IdentifyPayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(OpCode::Identify, serde_json::to_value(payload)?))
    }

    /// Create a Resume envelope (op=6)
    pub fn resume(payload: &ResumePayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(OpCode::Resume, serde_json::to_value(payload)?))
    }

    /// Create a Heartbeat envelope (op=1) carrying the last sequence seen
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::new(
            OpCode::Heartbeat,
            last_sequence.map_or(Value::Null, |s| Value::Number(s.into())),
        )
    }

    /// Create a Presence Update envelope (op=3)
    pub fn presence_update(payload: &PresencePayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(OpCode::PresenceUpdate, serde_json::to_value(payload)?))
    }

    /// The typed op code, if known
    #[must_use]
    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_u8(self.op)
    }

    #[must_use]
    pub fn is_dispatch(&self) -> bool {
        self.op == OpCode::Dispatch.as_u8()
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.opcode() {
            Some(op) => write!(f, "Envelope(op={op}")?,
            None => write!(f, "Envelope(op={}", self.op)?,
        }
        if let Some(t) = &self.t {
            write!(f, ", t={t}")?;
        }
        if let Some(s) = self.s {
            write!(f, ", s={s}")?;
        }
        write!(f, ")")
    }
}
