//! Fixed-window counter record.

use std::time::Duration;

/// Per-key counting state for one fixed window.
///
/// A record carries no synchronization of its own; the [`CounterStore`]
/// guards every record with the lock of the shard it lives in.
///
/// [`CounterStore`]: super::CounterStore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    /// Requests observed in the current window, including rejected ones
    count: u64,
    /// Absolute time (ms since epoch) at which the window expires
    window_reset_at: u64,
}

/// A point-in-time copy of a counter taken right after a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Count after the hit was applied
    pub count: u64,
    /// Absolute time (ms since epoch) at which the window expires
    pub window_reset_at: u64,
}

impl CounterRecord {
    /// Open a fresh window at `now`; the opening request counts as the first.
    pub fn open(now: u64, window: Duration) -> Self {
        Self {
            count: 1,
            window_reset_at: now.saturating_add(window_ms(window)),
        }
    }

    /// Whether the window has elapsed at `now`.
    ///
    /// The reset instant itself still belongs to the window.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.window_reset_at
    }

    /// Record one request at `now`.
    ///
    /// An expired window is reset to a count of one, otherwise the count is
    /// incremented.
    pub fn hit(&mut self, now: u64, window: Duration) -> CounterSnapshot {
        if self.is_expired(now) {
            *self = Self::open(now, window);
        } else {
            self.count = self.count.saturating_add(1);
        }
        self.snapshot()
    }

    /// Current count.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Absolute window reset time in milliseconds.
    pub fn window_reset_at(&self) -> u64 {
        self.window_reset_at
    }

    /// Copy the current state.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            count: self.count,
            window_reset_at: self.window_reset_at,
        }
    }
}

impl CounterSnapshot {
    /// Duration from `now` until the window resets.
    pub fn duration_until_reset(&self, now: u64) -> Duration {
        Duration::from_millis(self.window_reset_at.saturating_sub(now))
    }
}

fn window_ms(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX)
}
