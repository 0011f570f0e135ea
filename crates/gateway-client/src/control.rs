//! Operator control commands and external shutdown
//!
//! Only `!shutdown` is recognised. It must come from a control user and
//! address this bot by id, so several bots can share a channel.

use crate::events::MessageCreateEvent;
use gateway_common::NotifySettings;
use gateway_core::Snowflake;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const SHUTDOWN_COMMAND: &str = "!shutdown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Shutdown,
}

/// Command carried by a message, if it is authorised and addressed to `bot_id`
#[must_use]
pub fn parse_command(
    message: &MessageCreateEvent,
    bot_id: Snowflake,
    settings: &NotifySettings,
) -> Option<ControlCommand> {
    if !settings.is_control_user(message.author.id) {
        return None;
    }
    if !addresses_bot(&message.content, bot_id) {
        return None;
    }

    message
        .content
        .contains(SHUTDOWN_COMMAND)
        .then_some(ControlCommand::Shutdown)
}

/// Whether `content` names the bot as `<@id>` or the bare id, next to a space
#[must_use]
pub fn addresses_bot(content: &str, bot_id: Snowflake) -> bool {
    let id = bot_id.to_string();
    let mention = bot_id.mention();

    [
        format!("{id} "),
        format!(" {id}"),
        format!("{mention} "),
        format!(" {mention}"),
    ]
    .iter()
    .any(|needle| content.contains(needle.as_str()))
}

/// Shared flag asking the runtime loop to stop after its current iteration
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}
