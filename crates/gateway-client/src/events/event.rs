//! Typed gateway events

use super::event_types::GatewayEventType;
use super::payloads::{
    ChannelEvent, GuildCreateEvent, GuildDeleteEvent, GuildMemberAddEvent, GuildMemberRemoveEvent,
    MessageCreateEvent, MessageDeleteEvent, MessageUpdateEvent, PresenceEvent, ReadyEvent,
    TypingStartEvent, UserUpdateEvent,
};
use crate::protocol::{Envelope, HelloPayload, OpCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Payload of one routed message
///
/// Known `(op, name)` pairs get a typed variant. Anything else, including a
/// known name whose data does not match its shape, lands in `Opaque`.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Hello(HelloPayload),
    /// Server-requested heartbeat
    Heartbeat,
    HeartbeatAck,
    Reconnect,
    /// Whether the session may be resumed
    InvalidSession(bool),
    Ready(Box<ReadyEvent>),
    Resumed,
    MessageCreate(Box<MessageCreateEvent>),
    MessageUpdate(MessageUpdateEvent),
    MessageDelete(MessageDeleteEvent),
    GuildCreate(Box<GuildCreateEvent>),
    GuildDelete(GuildDeleteEvent),
    ChannelCreate(ChannelEvent),
    ChannelUpdate(ChannelEvent),
    ChannelDelete(ChannelEvent),
    GuildMemberAdd(Box<GuildMemberAddEvent>),
    GuildMemberRemove(GuildMemberRemoveEvent),
    PresenceUpdate(PresenceEvent),
    TypingStart(TypingStartEvent),
    UserUpdate(UserUpdateEvent),
    Opaque(Value),
}

impl EventPayload {
    #[must_use]
    pub fn is_opaque(&self) -> bool {
        matches!(self, Self::Opaque(_))
    }
}

/// One decoded message with its selected representation
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub op: u8,
    pub sequence: Option<u64>,
    pub name: Option<String>,
    pub payload: EventPayload,
}

impl GatewayEvent {
    /// Select the typed representation for an envelope
    #[must_use]
    pub fn from_envelope(envelope: Envelope) -> Self {
        let payload = select_payload(envelope.op, envelope.t.as_deref(), envelope.d);
        Self {
            op: envelope.op,
            sequence: envelope.s,
            name: envelope.t,
            payload,
        }
    }

    #[must_use]
    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_u8(self.op)
    }

    /// Event name if this is a dispatch with a known name
    #[must_use]
    pub fn event_type(&self) -> Option<GatewayEventType> {
        if self.op != OpCode::Dispatch.as_u8() {
            return None;
        }
        self.name.as_deref().and_then(GatewayEventType::from_name)
    }
}

fn select_payload(op: u8, name: Option<&str>, data: Value) -> EventPayload {
    match OpCode::from_u8(op) {
        Some(OpCode::Dispatch) => match name.and_then(GatewayEventType::from_name) {
            Some(event_type) => select_dispatch(event_type, data),
            None => EventPayload::Opaque(data),
        },
        Some(OpCode::Hello) => typed(data, EventPayload::Hello),
        Some(OpCode::Heartbeat) => EventPayload::Heartbeat,
        Some(OpCode::HeartbeatAck) => EventPayload::HeartbeatAck,
        Some(OpCode::Reconnect) => EventPayload::Reconnect,
        Some(OpCode::InvalidSession) => match data {
            Value::Bool(resumable) => EventPayload::InvalidSession(resumable),
            Value::Null => EventPayload::InvalidSession(false),
            other => EventPayload::Opaque(other),
        },
        _ => EventPayload::Opaque(data),
    }
}

fn select_dispatch(event_type: GatewayEventType, data: Value) -> EventPayload {
    match event_type {
        GatewayEventType::Ready => typed(data, |ready| EventPayload::Ready(Box::new(ready))),
        GatewayEventType::Resumed => EventPayload::Resumed,
        GatewayEventType::MessageCreate => {
            typed(data, |message| EventPayload::MessageCreate(Box::new(message)))
        }
        GatewayEventType::MessageUpdate => typed(data, EventPayload::MessageUpdate),
        GatewayEventType::MessageDelete => typed(data, EventPayload::MessageDelete),
        GatewayEventType::GuildCreate => {
            typed(data, |guild| EventPayload::GuildCreate(Box::new(guild)))
        }
        GatewayEventType::GuildDelete => typed(data, EventPayload::GuildDelete),
        GatewayEventType::ChannelCreate => typed(data, EventPayload::ChannelCreate),
        GatewayEventType::ChannelUpdate => typed(data, EventPayload::ChannelUpdate),
        GatewayEventType::ChannelDelete => typed(data, EventPayload::ChannelDelete),
        GatewayEventType::GuildMemberAdd => {
            typed(data, |member| EventPayload::GuildMemberAdd(Box::new(member)))
        }
        GatewayEventType::GuildMemberRemove => typed(data, EventPayload::GuildMemberRemove),
        GatewayEventType::PresenceUpdate => typed(data, EventPayload::PresenceUpdate),
        GatewayEventType::TypingStart => typed(data, EventPayload::TypingStart),
        GatewayEventType::UserUpdate => typed(data, EventPayload::UserUpdate),
    }
}

/// Deserialize into `T`, keeping the raw value on a shape mismatch
fn typed<T, F>(data: Value, wrap: F) -> EventPayload
where
    T: DeserializeOwned,
    F: FnOnce(T) -> EventPayload,
{
    match T::deserialize(&data) {
        Ok(value) => wrap(value),
        Err(e) => {
            tracing::debug!(error = %e, "Payload did not match its event shape");
            EventPayload::Opaque(data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::Snowflake;
    use serde_json::json;

    fn event(raw: Value) -> GatewayEvent {
        GatewayEvent::from_envelope(serde_json::from_value(raw).unwrap())
    }

    #[test]
    fn test_hello_is_typed() {
        let hello = event(json!({"op": 10, "d": {"heartbeat_interval": 41250}}));
        match &hello.payload {
            EventPayload::Hello(payload) => assert_eq!(payload.heartbeat_interval, 41250),
            other => panic!("expected Hello, got {other:?}"),
        }
        assert_eq!(hello.opcode(), Some(OpCode::Hello));
        assert_eq!(hello.event_type(), None);
    }

    #[test]
    fn test_ready_dispatch() {
        let ready = event(json!({
            "op": 0, "s": 1, "t": "READY",
            "d": {"user": {"id": "42", "username": "bot"}, "session_id": "abc"}
        }));
        assert_eq!(ready.sequence, Some(1));
        assert_eq!(ready.event_type(), Some(GatewayEventType::Ready));
        match ready.payload {
            EventPayload::Ready(payload) => {
                assert_eq!(payload.session_id, "abc");
                assert_eq!(payload.user.id, Snowflake::new(42));
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_name_is_opaque() {
        let unknown = event(json!({"op": 0, "s": 3, "t": "INTERACTION_CREATE", "d": {"x": 1}}));
        assert_eq!(unknown.name.as_deref(), Some("INTERACTION_CREATE"));
        match unknown.payload {
            EventPayload::Opaque(value) => assert_eq!(value["x"], 1),
            other => panic!("expected Opaque, got {other:?}"),
        }
    }

    #[test]
    fn test_shape_mismatch_is_opaque() {
        let broken = event(json!({"op": 0, "s": 2, "t": "MESSAGE_CREATE", "d": {"id": "1"}}));
        assert!(broken.payload.is_opaque());
        assert_eq!(broken.event_type(), Some(GatewayEventType::MessageCreate));
    }

    #[test]
    fn test_control_opcodes() {
        assert!(matches!(event(json!({"op": 11})).payload, EventPayload::HeartbeatAck));
        assert!(matches!(event(json!({"op": 1, "d": null})).payload, EventPayload::Heartbeat));
        assert!(matches!(event(json!({"op": 7, "d": null})).payload, EventPayload::Reconnect));
        assert!(matches!(
            event(json!({"op": 9, "d": true})).payload,
            EventPayload::InvalidSession(true)
        ));
        assert!(matches!(
            event(json!({"op": 9, "d": null})).payload,
            EventPayload::InvalidSession(false)
        ));
        assert!(event(json!({"op": 42, "d": 5})).payload.is_opaque());
    }

    #[test]
    fn test_resumed_ignores_data() {
        let resumed = event(json!({"op": 0, "s": 9, "t": "RESUMED", "d": {"_trace": []}}));
        assert!(matches!(resumed.payload, EventPayload::Resumed));
    }
}
