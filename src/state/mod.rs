//! State module for tracking quotas and run progress
//!
//! # Components
//!
//! - `RateLimitState`: the latest quota report for one credential set
//! - `RunPhase`: where a target is in its schedule (idle, due, running)
//! - `RunOutcome`: how a finished run ended (success, partial, failed)

mod rate_limit_state;
mod run_state;

pub use rate_limit_state::RateLimitState;
pub use run_state::{RunOutcome, RunPhase};
