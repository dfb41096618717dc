//! Per-credential quota tracker
//!
//! The tracker remembers the last quota report the provider returned for each
//! credential set and answers two questions for the fetch executor: may a call
//! go out now, and if not, how long until it may. It never performs I/O.

use crate::state::RateLimitState;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, trace};

/// Shared, cloneable quota tracker
///
/// Clones share the same underlying state, so every run that uses a given
/// credential set sees the reports recorded by the others.
#[derive(Debug, Clone)]
pub struct RateLimitTracker {
    states: Arc<RwLock<HashMap<String, RateLimitState>>>,
    safety_margin: Duration,
}

impl RateLimitTracker {
    /// Creates an empty tracker that pads every wait with `safety_margin`
    pub fn new(safety_margin: Duration) -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            safety_margin,
        }
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    /// Records a provider quota report, replacing whatever was known before
    pub fn record(
        &self,
        credential_id: &str,
        remaining: i64,
        reset_at: DateTime<Utc>,
        limit_total: u32,
    ) {
        self.record_at(credential_id, remaining, reset_at, limit_total, Utc::now());
    }

    pub fn record_at(
        &self,
        credential_id: &str,
        remaining: i64,
        reset_at: DateTime<Utc>,
        limit_total: u32,
        now: DateTime<Utc>,
    ) {
        let state = RateLimitState::new(remaining, reset_at, limit_total, now);
        debug!(
            credential = %credential_id,
            remaining = state.remaining,
            limit = state.limit_total,
            reset_in_ms = state.time_until_reset(now).as_millis() as u64,
            "Recorded rate limit"
        );
        self.write().insert(credential_id.to_string(), state);
    }

    /// Seeds the tracker with previously persisted states
    ///
    /// States whose reset already passed are dropped on the way in.
    pub fn restore(&self, states: HashMap<String, RateLimitState>) {
        let now = Utc::now();
        let mut map = self.write();
        for (credential_id, state) in states {
            if !state.is_stale(now) {
                map.insert(credential_id, state);
            }
        }
    }

    /// Whether a call for this credential may be issued now
    ///
    /// Unknown credentials and states past their reset are optimistic.
    pub fn may_proceed(&self, credential_id: &str, min_remaining_threshold: u32) -> bool {
        self.may_proceed_at(credential_id, min_remaining_threshold, Utc::now())
    }

    pub fn may_proceed_at(
        &self,
        credential_id: &str,
        min_remaining_threshold: u32,
        now: DateTime<Utc>,
    ) -> bool {
        match self.read().get(credential_id) {
            Some(state) => state.allows(min_remaining_threshold, now),
            None => true,
        }
    }

    /// How long to hold off before calling with this credential
    ///
    /// Zero when `may_proceed` holds, otherwise the time until the reset plus
    /// the safety margin.
    pub fn wait_duration(&self, credential_id: &str, min_remaining_threshold: u32) -> Duration {
        self.wait_duration_at(credential_id, min_remaining_threshold, Utc::now())
    }

    pub fn wait_duration_at(
        &self,
        credential_id: &str,
        min_remaining_threshold: u32,
        now: DateTime<Utc>,
    ) -> Duration {
        let states = self.read();
        let Some(state) = states.get(credential_id) else {
            return Duration::ZERO;
        };

        if state.allows(min_remaining_threshold, now) {
            return Duration::ZERO;
        }

        let wait = state.time_until_reset(now) + self.safety_margin;
        trace!(
            credential = %credential_id,
            remaining = state.remaining,
            wait_ms = wait.as_millis() as u64,
            "Quota gate closed"
        );
        wait
    }

    /// Current (non-stale) state for a credential
    pub fn get(&self, credential_id: &str) -> Option<RateLimitState> {
        let now = Utc::now();
        self.read()
            .get(credential_id)
            .filter(|state| !state.is_stale(now))
            .cloned()
    }

    /// Copy of every recorded state, for persistence
    pub fn snapshot(&self) -> HashMap<String, RateLimitState> {
        self.read().clone()
    }

    // A poisoned lock still holds whole states: each write replaces one entry.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, RateLimitState>> {
        self.states.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, RateLimitState>> {
        self.states.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}
