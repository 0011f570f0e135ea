//! Named-slot elapsed time tracker
//!
//! Each slot records an origin instant; reading a slot never resets it.
//! Built on `tokio::time::Instant` so a paused test clock drives it.

use std::time::Duration;
use tokio::time::Instant;

/// Independent timers kept per connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerSlot {
    /// Time since the last heartbeat was sent
    Cadence,
    /// Time since the last heartbeat ACK
    AckTimeout,
    /// Time spent waiting for the upgrade response
    Handshake,
}

impl TimerSlot {
    const COUNT: usize = 3;

    const fn index(self) -> usize {
        match self {
            Self::Cadence => 0,
            Self::AckTimeout => 1,
            Self::Handshake => 2,
        }
    }
}

/// Elapsed time per slot, scaled by a unit multiplier
///
/// With a multiplier of 1000 `elapsed` reports milliseconds.
#[derive(Debug, Clone)]
pub struct HeartbeatTimer {
    unit_multiplier: u64,
    origins: [Option<Instant>; TimerSlot::COUNT],
}

impl HeartbeatTimer {
    /// A multiplier of 0 is treated as 1
    #[must_use]
    pub fn new(unit_multiplier: u64) -> Self {
        Self {
            unit_multiplier: unit_multiplier.max(1),
            origins: [None; TimerSlot::COUNT],
        }
    }

    /// Timer reporting milliseconds
    #[must_use]
    pub fn millis() -> Self {
        Self::new(1000)
    }

    pub fn start(&mut self, slot: TimerSlot) {
        self.origins[slot.index()] = Some(Instant::now());
    }

    pub fn restart(&mut self, slot: TimerSlot) {
        self.start(slot);
    }

    /// Restart several slots at once
    pub fn restart_all(&mut self, slots: &[TimerSlot]) {
        let now = Instant::now();
        for slot in slots {
            self.origins[slot.index()] = Some(now);
        }
    }

    #[must_use]
    pub fn is_started(&self, slot: TimerSlot) -> bool {
        self.origins[slot.index()].is_some()
    }

    /// Elapsed time in units; 0 for a slot that was never started
    #[must_use]
    pub fn elapsed(&self, slot: TimerSlot) -> u64 {
        let micros = self.elapsed_duration(slot).as_micros();
        let units = micros * u128::from(self.unit_multiplier) / 1_000_000;
        u64::try_from(units).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn elapsed_duration(&self, slot: TimerSlot) -> Duration {
        self.origins[slot.index()].map_or(Duration::ZERO, |origin| origin.elapsed())
    }
}

impl Default for HeartbeatTimer {
    fn default() -> Self {
        Self::millis()
    }
}
