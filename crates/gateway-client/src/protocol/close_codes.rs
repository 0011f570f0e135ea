//! Gateway close codes and their reconnect classification

use gateway_common::CloseCodeOverrides;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What the client does after the gateway closes the socket with a given code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseClass {
    /// Reconnect and resume the existing session
    Recoverable,
    /// Reconnect with a fresh Identify; the session is gone
    SessionInvalid,
    /// Stop the client
    Fatal,
}

/// Application close codes sent by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum GatewayCloseCode {
    UnknownError = 4000,
    UnknownOpcode = 4001,
    DecodeError = 4002,
    NotAuthenticated = 4003,
    AuthenticationFailed = 4004,
    AlreadyAuthenticated = 4005,
    InvalidSequence = 4007,
    RateLimited = 4008,
    SessionTimedOut = 4009,
    InvalidShard = 4010,
    ShardingRequired = 4011,
    InvalidApiVersion = 4012,
    InvalidIntents = 4013,
    DisallowedIntents = 4014,
}

impl GatewayCloseCode {
    /// Create a `GatewayCloseCode` from a raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4007 => Some(Self::InvalidSequence),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimedOut),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            4012 => Some(Self::InvalidApiVersion),
            4013 => Some(Self::InvalidIntents),
            4014 => Some(Self::DisallowedIntents),
            _ => None,
        }
    }

    /// Get the raw u16 value
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the description for this close code
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::UnknownError => "Unknown error occurred",
            Self::UnknownOpcode => "Invalid opcode sent",
            Self::DecodeError => "Invalid payload encoding",
            Self::NotAuthenticated => "Payload sent before identifying",
            Self::AuthenticationFailed => "Authentication failed",
            Self::AlreadyAuthenticated => "Already authenticated",
            Self::InvalidSequence => "Invalid sequence number on resume",
            Self::RateLimited => "Rate limited",
            Self::SessionTimedOut => "Session timed out",
            Self::InvalidShard => "Invalid shard",
            Self::ShardingRequired => "Sharding required",
            Self::InvalidApiVersion => "Invalid API version",
            Self::InvalidIntents => "Invalid intents",
            Self::DisallowedIntents => "Disallowed intents",
        }
    }
}

impl std::fmt::Display for GatewayCloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({}): {}", self, self.as_u16(), self.description())
    }
}

impl From<GatewayCloseCode> for u16 {
    fn from(code: GatewayCloseCode) -> Self {
        code.as_u16()
    }
}

/// Maps a numeric close code to a [`CloseClass`]
///
/// Built-in ranges: 1000-1015 and 4000-4014 reconnect, a fixed subset of the
/// 4xxx range forces a fresh session, and anything else stops the client.
/// Fatal overrides are consulted before session-invalid ones.
#[derive(Debug, Clone)]
pub struct CloseCodeTable {
    session_invalid: HashSet<u16>,
    fatal: HashSet<u16>,
}

impl CloseCodeTable {
    pub const DEFAULT_SESSION_INVALID: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];

    /// Build a table, replacing the session-invalid set if given and adding fatal codes
    #[must_use]
    pub fn new(session_invalid: Option<&[u16]>, fatal: &[u16]) -> Self {
        Self {
            session_invalid: session_invalid
                .unwrap_or(&Self::DEFAULT_SESSION_INVALID)
                .iter()
                .copied()
                .collect(),
            fatal: fatal.iter().copied().collect(),
        }
    }

    #[must_use]
    pub fn from_overrides(overrides: &CloseCodeOverrides) -> Self {
        Self::new(overrides.session_invalid.as_deref(), &overrides.fatal)
    }

    #[must_use]
    pub fn classify(&self, code: u16) -> CloseClass {
        if self.fatal.contains(&code) {
            return CloseClass::Fatal;
        }
        if self.session_invalid.contains(&code) {
            return CloseClass::SessionInvalid;
        }
        match code {
            1000..=1015 | 4000..=4014 => CloseClass::Recoverable,
            _ => CloseClass::Fatal,
        }
    }
}

impl Default for CloseCodeTable {
    fn default() -> Self {
        Self::new(None, &[])
    }
}
