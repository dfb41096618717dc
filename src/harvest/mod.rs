//! Harvest module: scheduling, fetching and merging
//!
//! This module contains the core harvesting logic, including:
//! - Per-target scheduling with at most one run in flight per target
//! - Quota-gated, retried provider calls with pagination
//! - Translation of provider records and upserts into the store
//! - Startup wiring and shutdown

mod cancel;
mod coordinator;
mod executor;
mod merge;
mod progress;
mod scheduler;
mod translate;

#[cfg(test)]
pub(crate) mod testing;

pub use cancel::CancelToken;
pub use coordinator::{run_harvest, sync_targets, Harvester};
pub use executor::{ExecutorOptions, FetchError, FetchExecutor, FetchResult};
pub use merge::{MergeAction, MergeEngine, MergeReport};
pub use progress::{LogProgress, NoopProgress, ProgressSink};
pub use scheduler::{decide_outcome, Scheduler, TargetState, TriggerOutcome};
pub use translate::{translate_child, translate_item, ValidationError, DELETED_AUTHOR};
