//! Session state snapshot

use chrono::{DateTime, Utc};
use gateway_core::Snowflake;
use serde::Serialize;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Connected and processing events
    Run,
    /// Reconnecting to resume the existing session
    Reconnecting,
    /// Reconnecting with a fresh Identify
    FullReconnecting,
    /// Terminal
    Exited,
}

impl RunState {
    #[must_use]
    pub const fn is_reconnecting(self) -> bool {
        matches!(self, Self::Reconnecting | Self::FullReconnecting)
    }

    #[must_use]
    pub const fn is_exited(self) -> bool {
        matches!(self, Self::Exited)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Reconnecting => "reconnecting",
            Self::FullReconnecting => "full_reconnecting",
            Self::Exited => "exited",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable per-connection session data
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub run_state: RunState,
    /// Last dispatch sequence seen while in `Run`
    pub sequence: u64,
    /// Required to resume; cleared when a fresh session is needed
    pub session_id: Option<String>,
    pub reconnect_attempts: u32,
    /// Announced by Hello; 0 until then
    pub heartbeat_interval_ms: u64,
    pub last_ack_at: Option<DateTime<Utc>>,
    /// Host to reconnect to when resuming, learned from READY
    pub resume_gateway_url: Option<String>,
    pub bot_user_id: Option<Snowflake>,
}

impl SessionState {
    /// Fresh state for a new run
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_state: RunState::Run,
            sequence: 0,
            session_id: None,
            reconnect_attempts: 0,
            heartbeat_interval_ms: 0,
            last_ack_at: None,
            resume_gateway_url: None,
            bot_user_id: None,
        }
    }

    /// Sequence to send in a heartbeat, `None` before the first dispatch
    #[must_use]
    pub fn last_sequence(&self) -> Option<u64> {
        (self.sequence > 0).then_some(self.sequence)
    }

    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
