//! Gateway events
//!
//! Typed representations of inbound messages and the router that fans them
//! out to registered handlers.

mod event;
mod event_types;
mod payloads;
mod router;

pub use event::{EventPayload, GatewayEvent};
pub use event_types::GatewayEventType;
pub use payloads::{
    ChannelEvent, GuildCreateEvent, GuildDeleteEvent, GuildMemberAddEvent, GuildMemberRemoveEvent,
    MessageCreateEvent, MessageDeleteEvent, MessageUpdateEvent, PresenceEvent, ReadyEvent,
    TypingStartEvent, UnavailableGuild, UserIdPayload, UserPayload, UserUpdateEvent,
};
pub use router::{DecodeError, EventHandler, EventRouter};
