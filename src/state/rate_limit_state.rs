use chrono::{DateTime, Utc};
use std::time::Duration;

/// Last quota report the provider gave for one credential set
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitState {
    /// Calls left in the current window, floored at zero
    pub remaining: u32,

    /// When the provider resets the window
    pub reset_at: DateTime<Utc>,

    /// Size of the window (remaining + used at the time of the report)
    pub limit_total: u32,

    /// When this report was recorded locally
    pub checked_at: DateTime<Utc>,
}

impl RateLimitState {
    /// Creates a state from a provider report, flooring `remaining` at zero
    pub fn new(remaining: i64, reset_at: DateTime<Utc>, limit_total: u32, now: DateTime<Utc>) -> Self {
        let remaining = u32::try_from(remaining.max(0)).unwrap_or(u32::MAX);
        Self {
            remaining,
            reset_at,
            limit_total,
            checked_at: now,
        }
    }

    /// A state whose reset has passed says nothing about the current window
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at
    }

    /// Whether a call may be issued while keeping `threshold` calls in reserve
    pub fn allows(&self, threshold: u32, now: DateTime<Utc>) -> bool {
        self.is_stale(now) || self.remaining > threshold
    }

    /// Time left until the reset, zero once it has passed
    pub fn time_until_reset(&self, now: DateTime<Utc>) -> Duration {
        (self.reset_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Calls used so far in the current window
    pub fn used(&self) -> u32 {
        self.limit_total.saturating_sub(self.remaining)
    }
}
