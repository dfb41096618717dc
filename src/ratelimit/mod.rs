//! Rate limit tracking
//!
//! Quota state is kept per credential set, not per target: several targets
//! can share one API account and must share its budget.

mod tracker;

pub use tracker::RateLimitTracker;

use sha2::{Digest, Sha256};

/// Derives the quota key for an API account
///
/// Two configured credential entries for the same client and user map to the
/// same key, so they are throttled together.
pub fn credential_fingerprint(client_id: &str, username: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(client_id.as_bytes());
    hasher.update(b":");
    hasher.update(username.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}
