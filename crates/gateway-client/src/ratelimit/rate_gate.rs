//! Fixed-window counter bounding writes per connection
//!
//! Non-blocking: a rejected write is the caller's to drop and log.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateGate {
    limit: u32,
    window: Duration,
    window_start: Instant,
    count: u32,
}

impl RateGate {
    /// Gateway default: 120 writes per 60 seconds
    pub const DEFAULT_LIMIT: u32 = 120;
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Take one slot in the current window
    pub fn try_consume(&mut self) -> bool {
        self.try_consume_at(Instant::now())
    }

    /// Take one slot as of `now`
    pub fn try_consume_at(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.window_start) > self.window {
            debug!(previous_count = self.count, "Rate window elapsed, resetting");
            self.window_start = now;
            self.count = 0;
        }

        if self.count >= self.limit {
            return false;
        }

        self.count += 1;
        true
    }

    /// Slots left in the current window (ignores whether it has elapsed)
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT, Self::DEFAULT_WINDOW)
    }
}
