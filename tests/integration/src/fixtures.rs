//! Gateway payload fixtures
//!
//! Builders for the JSON messages a gateway sends.

use gateway_client::transport::Incoming;
use serde_json::{json, Value};

pub const BOT_ID: u64 = 4_242;
pub const CONTROL_USER_ID: u64 = 7;
pub const SESSION_ID: &str = "sess-1";
pub const RESUME_URL: &str = "wss://resume.test";

/// Wrap a payload as an inbound text message
pub fn text(value: Value) -> Incoming {
    Incoming::Text(value.to_string())
}

pub fn hello(heartbeat_interval: u64) -> Value {
    json!({"op": 10, "d": {"heartbeat_interval": heartbeat_interval}})
}

pub fn heartbeat_ack() -> Value {
    json!({"op": 11, "d": null})
}

pub fn reconnect() -> Value {
    json!({"op": 7, "d": null})
}

pub fn invalid_session(resumable: bool) -> Value {
    json!({"op": 9, "d": resumable})
}

pub fn dispatch(name: &str, sequence: u64, data: Value) -> Value {
    json!({"op": 0, "t": name, "s": sequence, "d": data})
}

pub fn ready(sequence: u64) -> Value {
    dispatch(
        "READY",
        sequence,
        json!({
            "v": 10,
            "user": {"id": BOT_ID.to_string(), "username": "gateway-bot", "bot": true},
            "guilds": [{"id": "100", "unavailable": true}],
            "session_id": SESSION_ID,
            "resume_gateway_url": RESUME_URL,
        }),
    )
}

pub fn resumed(sequence: u64) -> Value {
    dispatch("RESUMED", sequence, Value::Null)
}

pub fn guild_create(sequence: u64) -> Value {
    dispatch(
        "GUILD_CREATE",
        sequence,
        json!({"id": "100", "name": "test guild", "member_count": 3, "channels": []}),
    )
}

pub fn message_create(sequence: u64, author: u64, content: &str) -> Value {
    dispatch(
        "MESSAGE_CREATE",
        sequence,
        json!({
            "id": "900",
            "channel_id": "800",
            "author": {"id": author.to_string(), "username": "operator"},
            "content": content,
            "timestamp": "2026-10-16T12:00:00.000000+00:00",
        }),
    )
}

/// Message from the control user addressing the bot with the shutdown command
pub fn shutdown_command(sequence: u64) -> Value {
    message_create(sequence, CONTROL_USER_ID, &format!("<@{BOT_ID}> !shutdown"))
}
