//! Run progress reporting
//!
//! The executor and scheduler report through a [`ProgressSink`] instead of
//! logging directly, so a front end can forward progress wherever it wants.

use crate::storage::RunRecord;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receives progress increments and terminal results of runs
pub trait ProgressSink: Send + Sync {
    /// A page of items was fetched; `fetched` counts items seen so far
    fn items_fetched(&self, target: &str, fetched: u32, limit: u32);

    /// Children for one item were fetched
    fn children_fetched(&self, target: &str, item_id: &str, count: u32, done: u32, total: u32);

    /// The quota gate is holding the run back
    fn waiting_for_quota(&self, _target: &str, _wait: Duration) {}

    /// A run finished with any outcome
    fn run_finished(&self, run: &RunRecord);
}

/// Discards all progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn items_fetched(&self, _target: &str, _fetched: u32, _limit: u32) {}

    fn children_fetched(&self, _target: &str, _item_id: &str, _count: u32, _done: u32, _total: u32) {}

    fn run_finished(&self, _run: &RunRecord) {}
}

/// Reports progress through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn items_fetched(&self, target: &str, fetched: u32, limit: u32) {
        debug!(target_name = %target, fetched, limit, "Fetched items");
    }

    fn children_fetched(&self, target: &str, item_id: &str, count: u32, done: u32, total: u32) {
        debug!(
            target_name = %target,
            item = %item_id,
            count,
            "Fetched children ({}/{})",
            done,
            total
        );
    }

    fn waiting_for_quota(&self, target: &str, wait: Duration) {
        info!(target_name = %target, wait_ms = wait.as_millis() as u64, "Waiting for quota");
    }

    fn run_finished(&self, run: &RunRecord) {
        if run.outcome.is_failure() {
            warn!(
                target_name = %run.target,
                outcome = %run.outcome,
                error = run.error.as_deref().unwrap_or(""),
                items_inserted = run.items.inserted,
                items_updated = run.items.updated,
                "Run finished"
            );
        } else {
            info!(
                target_name = %run.target,
                outcome = %run.outcome,
                items_inserted = run.items.inserted,
                items_updated = run.items.updated,
                items_skipped = run.items.skipped,
                children_inserted = run.children.inserted,
                children_updated = run.children.updated,
                "Run finished"
            );
        }
    }
}
