//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::RateLimitState;
use crate::storage::{ChildRecord, ItemRecord, RunRecord, TargetRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Every method touches at most one record (or one small set of rows for a
/// single key), so a caller holding the backend behind a mutex for the length
/// of one read-compare-write gets an atomic upsert.
pub trait Storage {
    // ===== Targets =====

    /// Writes a target's configuration fields
    ///
    /// Creates the row if missing. For an existing row the bookkeeping fields
    /// (`last_run`, `next_run`, `needs_attention`) and the operator-controlled
    /// `active` flag are left untouched; the configured `active` only seeds
    /// new rows.
    fn upsert_target_config(&mut self, target: &TargetRecord) -> StorageResult<()>;

    /// Gets a target by name
    fn get_target(&self, name: &str) -> StorageResult<Option<TargetRecord>>;

    /// Gets every stored target, ordered by name
    fn list_targets(&self) -> StorageResult<Vec<TargetRecord>>;

    /// Soft-enables or soft-disables a target
    fn set_target_active(&mut self, name: &str, active: bool) -> StorageResult<()>;

    /// Records the schedule bookkeeping after a run
    ///
    /// # Arguments
    ///
    /// * `name` - The target name
    /// * `last_run` - When the run finished
    /// * `next_run` - When the target is due again
    /// * `needs_attention` - Whether an operator must look at the credential
    fn record_target_schedule(
        &mut self,
        name: &str,
        last_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
        needs_attention: bool,
    ) -> StorageResult<()>;

    // ===== Items =====

    /// Gets an item by its provider id
    fn get_item(&self, id: &str) -> StorageResult<Option<ItemRecord>>;

    /// Inserts a new item; fails if the id already exists
    fn insert_item(&mut self, item: &ItemRecord) -> StorageResult<()>;

    /// Overwrites the mutable fields of an existing item
    fn update_item_mutable(&mut self, item: &ItemRecord, refreshed_at: DateTime<Utc>)
        -> StorageResult<()>;

    /// Counts items, optionally for one target
    fn count_items(&self, target: Option<&str>) -> StorageResult<i64>;

    // ===== Children =====

    /// Gets a child by its provider id
    fn get_child(&self, id: &str) -> StorageResult<Option<ChildRecord>>;

    /// Inserts a new child; the owning item need not exist yet
    fn insert_child(&mut self, child: &ChildRecord) -> StorageResult<()>;

    /// Overwrites the mutable fields of an existing child
    fn update_child_mutable(
        &mut self,
        child: &ChildRecord,
        refreshed_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Gets every stored child of an item, ordered by depth then creation time
    fn get_children_for_item(&self, item_id: &str) -> StorageResult<Vec<ChildRecord>>;

    /// Counts children, optionally for one target
    fn count_children(&self, target: Option<&str>) -> StorageResult<i64>;

    // ===== Rate Limits =====

    /// Saves (replaces) the quota state for a credential key
    fn save_rate_limit(&mut self, credential_key: &str, state: &RateLimitState)
        -> StorageResult<()>;

    /// Loads every saved quota state
    fn load_rate_limits(&self) -> StorageResult<HashMap<String, RateLimitState>>;

    // ===== Runs =====

    /// Appends a finished run to the history, returning its row id
    fn insert_run(&mut self, run: &RunRecord) -> StorageResult<i64>;

    /// Gets the most recent runs, newest first, optionally for one target
    fn recent_runs(&self, target: Option<&str>, limit: u32) -> StorageResult<Vec<RunRecord>>;
}
