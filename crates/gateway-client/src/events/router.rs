//! Event router
//!
//! Decodes one raw message, selects its typed representation and fans it out
//! to registered handlers. Handlers run synchronously on the caller's task in
//! registration order; a slow handler delays the read loop.

use super::event::GatewayEvent;
use crate::protocol::{Envelope, OpCode};
use std::collections::HashMap;
use thiserror::Error;

/// Failure to turn a raw message into an envelope
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Empty gateway message")]
    Empty,

    #[error("Malformed gateway message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Callback invoked for matching events
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &GatewayEvent);
}

impl<F> EventHandler for F
where
    F: Fn(&GatewayEvent) + Send + Sync,
{
    fn handle(&self, event: &GatewayEvent) {
        self(event);
    }
}

struct Registration {
    /// `None` matches every event with the opcode
    name: Option<String>,
    handler: Box<dyn EventHandler>,
}

impl Registration {
    fn matches(&self, name: Option<&str>) -> bool {
        match &self.name {
            None => true,
            Some(wanted) => name == Some(wanted.as_str()),
        }
    }
}

/// Append-only callback registry keyed by opcode
#[derive(Default)]
pub struct EventRouter {
    registrations: HashMap<u8, Vec<Registration>>,
}

impl EventRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `op`, optionally narrowed to one event name
    pub fn register<H>(&mut self, op: OpCode, name: Option<&str>, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.registrations
            .entry(op.as_u8())
            .or_default()
            .push(Registration {
                name: name.map(str::to_owned),
                handler: Box::new(handler),
            });
    }

    /// Register a handler for one dispatch event name
    pub fn on_event<H>(&mut self, name: &str, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.register(OpCode::Dispatch, Some(name), handler);
    }

    /// Register a handler for every message with `op`
    pub fn on_opcode<H>(&mut self, op: OpCode, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.register(op, None, handler);
    }

    /// Number of handlers registered for `op`
    #[must_use]
    pub fn handler_count(&self, op: OpCode) -> usize {
        self.registrations.get(&op.as_u8()).map_or(0, Vec::len)
    }

    /// Decode, select a representation, and fan out
    ///
    /// The event is returned even when no handler matched.
    pub fn route(&self, raw: &str) -> Result<GatewayEvent, DecodeError> {
        if raw.trim().is_empty() {
            return Err(DecodeError::Empty);
        }

        let envelope = Envelope::from_json(raw)?;
        let event = GatewayEvent::from_envelope(envelope);
        self.dispatch(&event);
        Ok(event)
    }

    /// Invoke every matching handler for an already decoded event
    pub fn dispatch(&self, event: &GatewayEvent) -> usize {
        let Some(registrations) = self.registrations.get(&event.op) else {
            tracing::trace!(op = event.op, "No handlers registered");
            return 0;
        };

        let name = event.name.as_deref();
        let mut invoked = 0;
        for registration in registrations.iter().filter(|r| r.matches(name)) {
            registration.handler.handle(event);
            invoked += 1;
        }

        tracing::trace!(op = event.op, event = ?name, invoked, "Event dispatched");
        invoked
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<u8, usize> = self
            .registrations
            .iter()
            .map(|(op, regs)| (*op, regs.len()))
            .collect();
        f.debug_struct("EventRouter")
            .field("registrations", &counts)
            .finish()
    }
}
