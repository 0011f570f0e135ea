//! Session state machine
//!
//! Owns the [`SessionState`] and applies every lifecycle event to it:
//!
//! - `Run -> Reconnecting` on transport errors, ack timeouts, decode errors,
//!   op 7, resumable op 9 and recoverable close codes
//! - `Run -> FullReconnecting` on session-invalidating close codes,
//!   unrecoverable write failures and non-resumable op 9
//! - `Reconnecting | FullReconnecting -> Run` on RESUMED or READY
//! - `* -> Exited` on shutdown, fatal close codes or exhausted retries
//!
//! Failures that arrive while already reconnecting count as a failed attempt,
//! so a gateway that keeps closing right after the upgrade still exhausts the
//! retry budget.

use super::state::{RunState, SessionState};
use crate::protocol::{CloseClass, CloseCodeTable};
use chrono::Utc;
use gateway_core::Snowflake;
use tracing::{debug, error, info, warn};

/// A change of [`RunState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: RunState,
    pub to: RunState,
}

impl Transition {
    /// The transition brought the session back to `Run`
    #[must_use]
    pub fn entered_run(&self) -> bool {
        self.to == RunState::Run && self.from != RunState::Run
    }
}

/// What to send in reply to Hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelloReply {
    Identify,
    Resume { session_id: String, seq: u64 },
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    max_retries: u32,
    close_codes: CloseCodeTable,
}

impl SessionMachine {
    #[must_use]
    pub fn new(max_retries: u32, close_codes: CloseCodeTable) -> Self {
        Self {
            state: SessionState::new(),
            max_retries,
            close_codes,
        }
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn run_state(&self) -> RunState {
        self.state.run_state
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn classify_close(&self, code: u16) -> CloseClass {
        self.close_codes.classify(code)
    }

    /// Record the heartbeat interval and pick Identify or Resume
    ///
    /// Resume only when reconnecting with a known session id.
    pub fn on_hello(&mut self, heartbeat_interval_ms: u64) -> HelloReply {
        self.state.heartbeat_interval_ms = heartbeat_interval_ms;
        debug!(heartbeat_interval_ms, run_state = %self.state.run_state, "Hello received");

        match (&self.state.run_state, &self.state.session_id) {
            (RunState::Reconnecting, Some(session_id)) => HelloReply::Resume {
                session_id: session_id.clone(),
                seq: self.state.sequence,
            },
            _ => HelloReply::Identify,
        }
    }

    /// Track the sequence of a dispatch; returns whether it was recorded
    pub fn on_dispatch(&mut self, sequence: Option<u64>, name: Option<&str>) -> bool {
        match sequence {
            Some(seq) if self.state.run_state == RunState::Run => {
                self.state.sequence = seq;
                tracing::trace!(seq, event = name.unwrap_or_default(), "Sequence updated");
                true
            }
            _ => false,
        }
    }

    /// READY: store session identity and complete any reconnect
    pub fn on_ready(
        &mut self,
        session_id: impl Into<String>,
        resume_gateway_url: Option<String>,
        bot_user_id: Option<Snowflake>,
    ) -> Option<Transition> {
        let session_id = session_id.into();
        info!(
            session_id = %session_id,
            bot_user_id = ?bot_user_id,
            "Session ready"
        );

        self.state.session_id = Some(session_id);
        if resume_gateway_url.is_some() {
            self.state.resume_gateway_url = resume_gateway_url;
        }
        if bot_user_id.is_some() {
            self.state.bot_user_id = bot_user_id;
        }

        self.enter_run()
    }

    /// RESUMED: missed events have been replayed
    pub fn on_resumed(&mut self) -> Option<Transition> {
        info!(
            sequence = self.state.sequence,
            attempts = self.state.reconnect_attempts,
            "Session resumed, all missing events received"
        );
        self.enter_run()
    }

    pub fn on_heartbeat_ack(&mut self) {
        self.state.last_ack_at = Some(Utc::now());
        debug!("Heartbeat ACK received");
    }

    /// The gateway closed the socket with `code`
    pub fn on_close(&mut self, code: u16) -> Option<Transition> {
        match self.classify_close(code) {
            CloseClass::Recoverable => self.fail_to(RunState::Reconnecting, "close code"),
            CloseClass::SessionInvalid => self.fail_to(RunState::FullReconnecting, "session invalidated"),
            CloseClass::Fatal => {
                error!(code, "Gateway closed with an unrecoverable code, exiting");
                self.transition(RunState::Exited)
            }
        }
    }

    /// Socket read failed
    pub fn on_transport_error(&mut self) -> Option<Transition> {
        self.fail_to(RunState::Reconnecting, "transport error")
    }

    /// A message did not decode
    pub fn on_decode_error(&mut self) -> Option<Transition> {
        self.fail_to(RunState::Reconnecting, "decode error")
    }

    /// A write failed; `recoverable` keeps the session for a resume
    pub fn on_write_failure(&mut self, recoverable: bool) -> Option<Transition> {
        if recoverable {
            self.fail_to(RunState::Reconnecting, "write failure")
        } else {
            self.fail_to(RunState::FullReconnecting, "unrecoverable write failure")
        }
    }

    /// No heartbeat ACK within 1.5 intervals
    ///
    /// While reconnecting this counts as a failed attempt.
    pub fn on_ack_timeout(&mut self) -> Option<Transition> {
        self.fail_to(RunState::Reconnecting, "heartbeat ack timeout")
    }

    /// A socket opened but Hello, or READY/RESUMED after a reconnect, never came
    pub fn on_session_timeout(&mut self) -> Option<Transition> {
        self.fail_to(RunState::Reconnecting, "session not established")
    }

    /// Op 7
    pub fn on_reconnect_requested(&mut self) -> Option<Transition> {
        self.fail_to(RunState::Reconnecting, "reconnect requested by gateway")
    }

    /// Op 9
    pub fn on_invalid_session(&mut self, resumable: bool) -> Option<Transition> {
        if resumable {
            self.fail_to(RunState::Reconnecting, "invalid session (resumable)")
        } else {
            self.fail_to(RunState::FullReconnecting, "invalid session")
        }
    }

    /// Check the retry budget before sleeping and reconnecting
    ///
    /// Returns `false` (and exits) once the budget is spent.
    pub fn begin_reconnect_attempt(&mut self) -> bool {
        if !self.state.run_state.is_reconnecting() {
            return false;
        }
        if self.state.reconnect_attempts >= self.max_retries {
            error!(
                attempts = self.state.reconnect_attempts,
                max_retries = self.max_retries,
                "Max reconnection tries reached, giving up"
            );
            self.transition(RunState::Exited);
            return false;
        }
        warn!(
            attempt = self.state.reconnect_attempts + 1,
            max_retries = self.max_retries,
            run_state = %self.state.run_state,
            "Reconnecting"
        );
        true
    }

    /// A reconnect attempt failed
    pub fn on_reconnect_failed(&mut self) -> Option<Transition> {
        if !self.state.run_state.is_reconnecting() {
            return None;
        }
        self.record_failed_attempt()
    }

    /// Explicit shutdown
    pub fn shutdown(&mut self) -> Option<Transition> {
        info!("Shutdown requested");
        self.transition(RunState::Exited)
    }

    fn enter_run(&mut self) -> Option<Transition> {
        if !self.state.run_state.is_reconnecting() {
            return None;
        }
        self.state.reconnect_attempts = 0;
        self.transition(RunState::Run)
    }

    /// Move to a reconnect state, or count a failed attempt if already reconnecting
    fn fail_to(&mut self, target: RunState, reason: &'static str) -> Option<Transition> {
        match self.state.run_state {
            RunState::Exited => None,
            RunState::Run => {
                warn!(reason, to = %target, "Connection lost");
                self.transition(target)
            }
            current => {
                // Escalate Reconnecting to FullReconnecting, never the reverse
                let escalated = if target == RunState::FullReconnecting && current == RunState::Reconnecting {
                    self.transition(target)
                } else {
                    None
                };
                warn!(reason, run_state = %self.state.run_state, "Failure while reconnecting");
                self.record_failed_attempt().or(escalated)
            }
        }
    }

    fn record_failed_attempt(&mut self) -> Option<Transition> {
        self.state.reconnect_attempts += 1;
        if self.state.reconnect_attempts >= self.max_retries {
            error!(
                attempts = self.state.reconnect_attempts,
                max_retries = self.max_retries,
                "Reconnect attempts exhausted, exiting"
            );
            return self.transition(RunState::Exited);
        }
        None
    }

    fn transition(&mut self, to: RunState) -> Option<Transition> {
        let from = self.state.run_state;
        if from == to || from == RunState::Exited {
            return None;
        }

        if to == RunState::FullReconnecting {
            self.state.session_id = None;
            self.state.sequence = 0;
            self.state.resume_gateway_url = None;
        }

        self.state.run_state = to;
        debug!(%from, %to, "Run state changed");
        Some(Transition { from, to })
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new(3, CloseCodeTable::default())
    }
}
