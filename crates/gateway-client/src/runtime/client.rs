//! Gateway client runtime loop
//!
//! One task drives everything for a connection, strictly in order:
//! read (with a short poll timeout) -> route -> act -> heartbeat checks ->
//! reconnect when needed -> shutdown check. Nothing here is shared between
//! tasks; run several clients for several connections.

use crate::codec::FrameType;
use crate::control::{self, ControlCommand, ShutdownHandle};
use crate::error::ClientError;
use crate::events::{EventPayload, EventRouter, GatewayEvent, MessageCreateEvent, ReadyEvent};
use crate::notify::{BotIdentity, Notice, Notifier};
use crate::protocol::{
    CloseClass, CloseCodeTable, Envelope, IdentifyPayload, OpCode, PresencePayload, ResumePayload,
};
use crate::ratelimit::RateGate;
use crate::rest::RestExecutor;
use crate::session::{Backoff, HelloReply, RunState, SessionMachine, SessionState, Transition};
use crate::timing::{HeartbeatTimer, TimerSlot};
use crate::transport::{
    GatewayResolver, GatewayTarget, GatewayTransport, Incoming, TransportError,
};
use gateway_common::ClientConfig;
use std::fmt;
use std::time::Duration;

/// How long one read waits before the loop moves on to timer checks
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Close code for a clean shutdown; the session is discarded
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code when dropping a connection to reconnect; keeps the session resumable
pub const RECONNECT_CLOSURE: u16 = 4000;

/// Why the loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The [`ShutdownHandle`] was triggered
    ShutdownRequested,
    /// A control user sent the shutdown command
    ShutdownCommand,
    /// The gateway closed with a code outside every recoverable range
    FatalClose(u16),
    /// The reconnect budget ran out
    RetriesExhausted,
}

impl ExitReason {
    /// Whether the exit was asked for rather than forced
    #[must_use]
    pub fn is_requested(&self) -> bool {
        matches!(self, Self::ShutdownRequested | Self::ShutdownCommand)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShutdownRequested => f.write_str("shutdown requested"),
            Self::ShutdownCommand => f.write_str("shutdown command received"),
            Self::FatalClose(code) => write!(f, "gateway closed with fatal code {code}"),
            Self::RetriesExhausted => f.write_str("reconnect attempts exhausted"),
        }
    }
}

/// A persistent gateway connection and everything that drives it
pub struct GatewayClient<T, R> {
    config: ClientConfig,
    transport: T,
    rest: R,
    router: EventRouter,
    machine: SessionMachine,
    timer: HeartbeatTimer,
    rate_gate: RateGate,
    backoff: Backoff,
    notifier: Notifier,
    resolver: GatewayResolver,
    shutdown: ShutdownHandle,
    target: Option<GatewayTarget>,
    connected: bool,
    /// Hello seen on the current connection; heartbeats wait for it
    hello_received: bool,
    poll_interval: Duration,
    exit_reason: Option<ExitReason>,
}

impl<T, R> GatewayClient<T, R>
where
    T: GatewayTransport,
    R: RestExecutor,
{
    pub fn new(config: ClientConfig, transport: T, rest: R) -> Self {
        let machine = SessionMachine::new(
            config.reconnect.max_retries,
            CloseCodeTable::from_overrides(&config.close_codes),
        );
        let rate_gate = RateGate::new(config.rate_limit.limit, config.rate_limit.window());
        let backoff = Backoff::from_config(&config.reconnect);
        let notifier =
            Notifier::new(&config.notify).with_delivery_timeout(config.gateway.rest_timeout());
        let resolver =
            GatewayResolver::new(config.gateway.gateway_url.clone(), config.gateway.api_version);

        Self {
            config,
            transport,
            rest,
            router: EventRouter::new(),
            machine,
            timer: HeartbeatTimer::millis(),
            rate_gate,
            backoff,
            notifier,
            resolver,
            shutdown: ShutdownHandle::new(),
            target: None,
            connected: false,
            hello_received: false,
            poll_interval: POLL_INTERVAL,
            exit_reason: None,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Register handlers here before calling [`run`](Self::run)
    pub fn router_mut(&mut self) -> &mut EventRouter {
        &mut self.router
    }

    /// Handle that stops the loop from outside, e.g. on Ctrl-C
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        self.machine.state()
    }

    #[must_use]
    pub fn exit_reason(&self) -> Option<&ExitReason> {
        self.exit_reason.as_ref()
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Connect and process events until the session exits
    ///
    /// Only failures before the first connection are errors; later failures
    /// go through the reconnect logic and end in an [`ExitReason`].
    pub async fn run(&mut self) -> Result<SessionState, ClientError> {
        let target = self
            .resolver
            .resolve(&self.rest)
            .await
            .map_err(ClientError::Resolve)?;

        tracing::info!(gateway = %target, "Connecting to gateway");
        if let Err(source) = self.transport.connect(&target).await {
            self.machine.shutdown();
            return Err(ClientError::Connect {
                target: target.to_string(),
                source,
            });
        }
        self.on_connected(target);

        while !self.machine.run_state().is_exited() {
            self.poll_once().await;
            self.check_heartbeat().await;

            if self.machine.run_state().is_reconnecting() && !self.connected {
                self.reconnect().await;
            }

            if self.shutdown.is_requested() && !self.machine.run_state().is_exited() {
                self.shut_down(ExitReason::ShutdownRequested).await;
            }
        }

        tracing::info!(
            reason = ?self.exit_reason,
            sequence = self.machine.state().sequence,
            "Gateway client stopped"
        );
        Ok(self.machine.state().clone())
    }

    fn on_connected(&mut self, target: GatewayTarget) {
        self.target = Some(target);
        self.connected = true;
        self.hello_received = false;
        self.timer.restart_all(&[
            TimerSlot::Cadence,
            TimerSlot::AckTimeout,
            TimerSlot::Handshake,
        ]);
    }

    async fn poll_once(&mut self) {
        if !self.connected {
            return;
        }

        let incoming =
            match tokio::time::timeout(self.poll_interval, self.transport.read_message()).await {
                Err(_) => return,
                Ok(result) => result,
            };

        match incoming {
            Ok(Incoming::Text(text)) => self.handle_text(&text).await,
            Ok(Incoming::Ping(payload)) => {
                tracing::trace!(len = payload.len(), "Ping received");
                if let Err(e) = self.transport.send(FrameType::Pong, &payload).await {
                    self.fail_write(&e, true).await;
                }
            }
            Ok(Incoming::Close(notice)) => {
                tracing::warn!(code = notice.code, reason = %notice.reason, "Gateway closed connection");
                self.drop_connection(RECONNECT_CLOSURE).await;
                let fatal = self.machine.classify_close(notice.code) == CloseClass::Fatal;
                let transition = self.machine.on_close(notice.code);
                if fatal && transition.is_some_and(|t| t.to.is_exited()) {
                    self.set_exit_reason(ExitReason::FatalClose(notice.code));
                }
                self.after_transition(transition, &format!("gateway closed: {notice}"))
                    .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Gateway read failed");
                self.drop_connection(RECONNECT_CLOSURE).await;
                let transition = self.machine.on_transport_error();
                self.after_transition(transition, &e.to_string()).await;
            }
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let event = match self.router.route(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "Could not decode gateway message");
                self.drop_connection(RECONNECT_CLOSURE).await;
                let transition = self.machine.on_decode_error();
                self.after_transition(transition, &e.to_string()).await;
                return;
            }
        };

        if event.op == OpCode::Dispatch.as_u8() {
            self.machine
                .on_dispatch(event.sequence, event.name.as_deref());
        }

        self.act(event).await;
    }

    /// Apply one routed event to the session
    async fn act(&mut self, event: GatewayEvent) {
        match event.payload {
            EventPayload::Hello(hello) => self.on_hello(hello.heartbeat_interval).await,
            EventPayload::Heartbeat => {
                tracing::debug!("Gateway requested a heartbeat");
                self.send_heartbeat().await;
            }
            EventPayload::HeartbeatAck => {
                self.timer.restart(TimerSlot::AckTimeout);
                self.machine.on_heartbeat_ack();
            }
            EventPayload::Reconnect => {
                tracing::info!("Gateway requested reconnect");
                self.drop_connection(RECONNECT_CLOSURE).await;
                let transition = self.machine.on_reconnect_requested();
                self.after_transition(transition, "reconnect requested").await;
            }
            EventPayload::InvalidSession(resumable) => {
                tracing::warn!(resumable, "Session invalidated by gateway");
                self.drop_connection(RECONNECT_CLOSURE).await;
                let transition = self.machine.on_invalid_session(resumable);
                self.after_transition(transition, "invalid session").await;
            }
            EventPayload::Ready(ready) => self.on_ready(&ready).await,
            EventPayload::Resumed => {
                let transition = self.machine.on_resumed();
                self.after_transition(transition, "resumed").await;
            }
            EventPayload::MessageCreate(message) => self.on_message(&message).await,
            _ => {}
        }
    }

    async fn on_hello(&mut self, heartbeat_interval: u64) {
        self.hello_received = true;
        self.timer
            .restart_all(&[TimerSlot::Cadence, TimerSlot::AckTimeout]);

        let envelope = match self.machine.on_hello(heartbeat_interval) {
            HelloReply::Identify => {
                tracing::info!("Sending Identify");
                Envelope::identify(&IdentifyPayload::new(
                    self.config.gateway.token.clone(),
                    self.config.gateway.intents,
                ))
            }
            HelloReply::Resume { session_id, seq } => {
                tracing::info!(session_id = %session_id, seq, "Sending Resume");
                Envelope::resume(&ResumePayload {
                    token: self.config.gateway.token.clone(),
                    session_id,
                    seq,
                })
            }
        };

        let sent = match envelope {
            Ok(envelope) => self.write_handshake(&envelope).await,
            Err(e) => Err(std::io::Error::from(e).into()),
        };
        if let Err(e) = sent {
            self.fail_write(&e, false).await;
        }
    }

    async fn on_ready(&mut self, ready: &ReadyEvent) {
        self.notifier.set_bot(BotIdentity {
            id: ready.user.id,
            username: ready.user.username.clone(),
        });

        let transition = self.machine.on_ready(
            ready.session_id.clone(),
            ready.resume_gateway_url.clone(),
            Some(ready.user.id),
        );
        self.after_transition(transition, "ready").await;
        self.notifier.send(&self.rest, &Notice::Startup).await;
    }

    async fn on_message(&mut self, message: &MessageCreateEvent) {
        let Some(bot_id) = self.machine.state().bot_user_id else {
            return;
        };

        if let Some(ControlCommand::Shutdown) =
            control::parse_command(message, bot_id, &self.config.notify)
        {
            tracing::warn!(
                author = %message.author.id,
                channel = %message.channel_id,
                "Shutdown command received"
            );
            self.shut_down(ExitReason::ShutdownCommand).await;
        }
    }

    /// Heartbeat cadence and ACK timeout, polled every iteration
    ///
    /// Hello, and after a reconnect READY or RESUMED too, must arrive within
    /// [`session_deadline`](Self::session_deadline) of the socket opening.
    async fn check_heartbeat(&mut self) {
        if !self.connected {
            return;
        }

        let since_connect = self.timer.elapsed_duration(TimerSlot::Handshake);
        let unconfirmed = self.machine.run_state().is_reconnecting() || !self.hello_received;
        if unconfirmed && since_connect > self.session_deadline() {
            tracing::warn!(
                elapsed_ms = since_connect.as_millis() as u64,
                hello_received = self.hello_received,
                "Session not established on this connection"
            );
            self.drop_connection(RECONNECT_CLOSURE).await;
            let transition = self.machine.on_session_timeout();
            self.after_transition(transition, "session not established").await;
            return;
        }

        let interval = self.machine.state().heartbeat_interval_ms;
        if !self.hello_received || interval == 0 {
            return;
        }

        let ack_timeout = interval.saturating_mul(3) / 2;
        if self.timer.elapsed(TimerSlot::AckTimeout) > ack_timeout {
            tracing::warn!(
                elapsed_ms = self.timer.elapsed(TimerSlot::AckTimeout),
                ack_timeout_ms = ack_timeout,
                "No heartbeat ACK received"
            );
            self.drop_connection(RECONNECT_CLOSURE).await;
            let transition = self.machine.on_ack_timeout();
            self.after_transition(transition, "heartbeat ack timeout").await;
            return;
        }

        if self.timer.elapsed(TimerSlot::Cadence) >= interval {
            self.send_heartbeat().await;
        }
    }

    /// Handshake timeout, or one and a half heartbeat intervals if longer
    fn session_deadline(&self) -> Duration {
        let interval = self.machine.state().heartbeat_interval_ms;
        self.config
            .gateway
            .handshake_timeout()
            .max(Duration::from_millis(interval.saturating_mul(3) / 2))
    }

    async fn send_heartbeat(&mut self) {
        let envelope = Envelope::heartbeat(self.machine.state().last_sequence());
        self.timer.restart(TimerSlot::Cadence);

        match self.write(&envelope).await {
            Ok(true) => tracing::debug!(seq = ?envelope.d, "Heartbeat sent"),
            Ok(false) => {}
            Err(e) => self.fail_write(&e, true).await,
        }
    }

    /// Write one envelope through the rate gate
    ///
    /// Returns `Ok(false)` when the gate dropped it.
    async fn write(&mut self, envelope: &Envelope) -> Result<bool, TransportError> {
        if !self.rate_gate.try_consume() {
            tracing::warn!(
                op = envelope.op,
                limit = self.rate_gate.limit(),
                "Gateway rate limit reached, message dropped"
            );
            return Ok(false);
        }

        self.send_envelope(envelope).await?;
        Ok(true)
    }

    /// Identify and Resume are never dropped; they still use up gate capacity
    async fn write_handshake(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        if !self.rate_gate.try_consume() {
            tracing::debug!(op = envelope.op, "Rate gate full, sending handshake reply anyway");
        }
        self.send_envelope(envelope).await
    }

    async fn send_envelope(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let payload = envelope.to_json().map_err(std::io::Error::from)?;
        self.transport.send(FrameType::Text, payload.as_bytes()).await
    }

    /// An outbound write failed; encoding overflows always need a fresh session
    async fn fail_write(&mut self, error: &TransportError, recoverable: bool) {
        let recoverable = recoverable && !error.is_encoding_overflow();
        tracing::error!(error = %error, recoverable, "Gateway write failed");

        self.drop_connection(RECONNECT_CLOSURE).await;
        let transition = self.machine.on_write_failure(recoverable);
        self.after_transition(transition, &error.to_string()).await;
    }

    /// Bounded reconnect loop with randomized backoff
    async fn reconnect(&mut self) {
        while self.machine.begin_reconnect_attempt() {
            let delay = self.backoff.next_delay();
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
            tokio::time::sleep(delay).await;

            if self.shutdown.is_requested() {
                return;
            }

            match self.open_connection().await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        attempts = self.machine.state().reconnect_attempts + 1,
                        "Reconnect attempt failed"
                    );
                    let transition = self.machine.on_reconnect_failed();
                    self.after_transition(transition, &e.to_string()).await;
                }
            }
        }

        if self.machine.run_state().is_exited() {
            self.set_exit_reason(ExitReason::RetriesExhausted);
        }
    }

    /// Resume against the session's host, or resolve a fresh one for a new session
    async fn open_connection(&mut self) -> Result<(), TransportError> {
        let target = if self.machine.run_state() == RunState::FullReconnecting {
            self.resolver.resolve(&self.rest).await?
        } else {
            let resume = self
                .machine
                .state()
                .resume_gateway_url
                .as_deref()
                .and_then(|url| self.resolver.target(url).ok());
            match resume.or_else(|| self.target.clone()) {
                Some(target) => target,
                None => self.resolver.resolve(&self.rest).await?,
            }
        };

        tracing::info!(gateway = %target, run_state = %self.machine.run_state(), "Reconnecting to gateway");
        self.transport.connect(&target).await?;
        self.on_connected(target);
        Ok(())
    }

    async fn drop_connection(&mut self, code: u16) {
        if self.connected {
            if let Err(e) = self.transport.close(code).await {
                tracing::debug!(error = %e, "Close frame not delivered");
            }
        }
        self.connected = false;
        self.hello_received = false;
    }

    /// Go offline, close with 1000, tell the control users, and exit
    async fn shut_down(&mut self, reason: ExitReason) {
        tracing::info!(reason = %reason, "Shutting down gateway client");
        if self.connected && self.machine.run_state() == RunState::Run {
            self.announce_offline().await;
        }
        self.drop_connection(NORMAL_CLOSURE).await;
        self.notifier.send(&self.rest, &Notice::Shutdown).await;
        self.machine.shutdown();
        self.set_exit_reason(reason);
    }

    /// Presence update with status `offline`; only sent once identified
    async fn announce_offline(&mut self) {
        if self.machine.state().session_id.is_none() {
            return;
        }
        let sent = match Envelope::presence_update(&PresencePayload::with_status("offline")) {
            Ok(envelope) => self.write(&envelope).await.map(|_| ()),
            Err(e) => Err(std::io::Error::from(e).into()),
        };
        if let Err(e) = sent {
            tracing::debug!(error = %e, "Offline presence not delivered");
        }
    }

    fn set_exit_reason(&mut self, reason: ExitReason) {
        if self.exit_reason.is_none() {
            self.exit_reason = Some(reason);
        }
    }

    /// Timers and notices that follow a state change
    async fn after_transition(&mut self, transition: Option<Transition>, reason: &str) {
        let Some(transition) = transition else {
            return;
        };

        if transition.entered_run() {
            self.timer
                .restart_all(&[TimerSlot::Cadence, TimerSlot::AckTimeout]);
            tracing::info!(from = %transition.from, "Session back in run state");
            return;
        }

        if transition.to.is_exited() && self.exit_reason.is_none() {
            self.exit_reason = Some(ExitReason::RetriesExhausted);
        }

        let notice = Notice::Failure {
            message: reason.to_string(),
            state: transition.to,
        };
        self.notifier.send(&self.rest, &notice).await;
    }
}

impl<T, R> fmt::Debug for GatewayClient<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayClient")
            .field("state", self.machine.state())
            .field("target", &self.target)
            .field("connected", &self.connected)
            .field("router", &self.router)
            .finish()
    }
}
