//! Control payload definitions
//!
//! Payloads carried in the `d` field of non-dispatch envelopes.

use gateway_core::Intents;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload for op 10 (Hello)
///
/// Sent by the server immediately after connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Payload for op 2 (Identify)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
    pub properties: IdentifyProperties,
    #[serde(default)]
    pub compress: bool,
    pub presence: PresencePayload,
    pub intents: Intents,
}

impl IdentifyPayload {
    /// Identify with this host's properties and an online presence
    #[must_use]
    pub fn new(token: impl Into<String>, intents: Intents) -> Self {
        Self {
            token: token.into(),
            properties: IdentifyProperties::current(),
            compress: false,
            presence: PresencePayload::online(),
            intents,
        }
    }
}

/// Client identification triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    /// Operating system
    pub os: String,
    /// Library name
    pub browser: String,
    /// Device name; bots report the library name
    pub device: String,
}

impl IdentifyProperties {
    /// Properties describing this process
    #[must_use]
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

/// Presence carried in Identify and op 3 (Presence Update)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresencePayload {
    /// Unix time (ms) the client went idle
    pub since: Option<u64>,
    #[serde(default)]
    pub activities: Vec<Value>,
    /// online, dnd, idle, invisible, offline
    pub status: String,
    pub afk: bool,
}

impl PresencePayload {
    /// Valid status values
    pub const VALID_STATUSES: &'static [&'static str] = &["online", "dnd", "idle", "invisible", "offline"];

    #[must_use]
    pub fn online() -> Self {
        Self::with_status("online")
    }

    #[must_use]
    pub fn with_status(status: impl Into<String>) -> Self {
        Self {
            since: None,
            activities: Vec::new(),
            status: status.into(),
            afk: false,
        }
    }

    /// Check if the status is valid
    #[must_use]
    pub fn is_valid_status(&self) -> bool {
        Self::VALID_STATUSES.contains(&self.status.as_str())
    }
}

/// Payload for op 6 (Resume)
///
/// Sent by the client to replay events missed while disconnected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Authentication token
    pub token: String,

    /// Session ID to resume
    pub session_id: String,

    /// Last received sequence number
    pub seq: u64,
}
