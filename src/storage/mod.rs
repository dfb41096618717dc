//! Storage module for persisting harvested data
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - Target configuration and schedule bookkeeping
//! - Item and child records with their mutable-field refreshes
//! - Rate limit state persistence across restarts
//! - Run history

mod schema;
mod sqlite;
mod traits;

pub use sqlite::{init_database, SqliteStorage};
pub use traits::{Storage, StorageError, StorageResult};

use crate::config::TargetEntry;
use crate::provider::{Listing, TimeWindow};
use crate::state::RunOutcome;
use crate::HarvestError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(HarvestError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, HarvestError> {
    SqliteStorage::new(path)
}

/// A target as persisted: configuration plus schedule bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRecord {
    pub name: String,
    pub credential: String,
    pub listing: Listing,
    pub time_window: TimeWindow,
    pub interval_secs: u64,
    pub max_items_per_run: u32,
    pub fetch_children: bool,
    pub max_children_per_item: u32,
    pub max_child_depth: u32,
    pub active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    /// Set when the credential was rejected; cleared by the next successful run
    pub needs_attention: bool,
}

impl TargetRecord {
    /// Builds a record with empty bookkeeping from a configured target
    pub fn from_entry(entry: &TargetEntry) -> Self {
        Self {
            name: entry.name.clone(),
            credential: entry.credential.clone(),
            listing: entry.listing,
            time_window: entry.time_window,
            interval_secs: entry.interval_secs,
            max_items_per_run: entry.max_items_per_run,
            fetch_children: entry.fetch_children,
            max_children_per_item: entry.max_children_per_item,
            max_child_depth: entry.max_child_depth,
            active: entry.active,
            last_run: None,
            next_run: None,
            needs_attention: false,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// A target never run before is due immediately
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.next_run.map_or(true, |next| now >= next)
    }
}

/// A post-equivalent record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemRecord {
    pub id: String,
    pub target: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub url: String,
    pub permalink: String,
    pub domain: String,
    pub score: i64,
    pub ratio: f64,
    pub num_comments: i64,
    pub is_self: bool,
    pub is_video: bool,
    pub over_18: bool,
    pub spoiler: bool,
    pub stickied: bool,
    pub locked: bool,
    pub archived: bool,
    pub edited: bool,
    pub gilded: i64,
    pub distinguished: Option<String>,
    pub flair: Option<String>,
    pub post_hint: Option<String>,
    pub thumbnail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

/// The fields of an item that a re-fetch may refresh
#[derive(Debug, Clone, PartialEq)]
pub struct ItemMutableFields {
    pub body: String,
    pub score: i64,
    pub ratio: f64,
    pub num_comments: i64,
    pub over_18: bool,
    pub spoiler: bool,
    pub stickied: bool,
    pub locked: bool,
    pub archived: bool,
    pub edited: bool,
    pub gilded: i64,
    pub distinguished: Option<String>,
    pub flair: Option<String>,
}

impl ItemRecord {
    pub fn mutable_fields(&self) -> ItemMutableFields {
        ItemMutableFields {
            body: self.body.clone(),
            score: self.score,
            ratio: self.ratio,
            num_comments: self.num_comments,
            over_18: self.over_18,
            spoiler: self.spoiler,
            stickied: self.stickied,
            locked: self.locked,
            archived: self.archived,
            edited: self.edited,
            gilded: self.gilded,
            distinguished: self.distinguished.clone(),
            flair: self.flair.clone(),
        }
    }
}

/// A comment-equivalent record
///
/// `parent_child_id` is `None` for top-level children; `depth` is 0 for them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildRecord {
    pub id: String,
    pub item_id: String,
    pub parent_child_id: Option<String>,
    pub depth: u32,
    pub target: String,
    pub body: String,
    pub author: String,
    pub score: i64,
    pub edited: bool,
    pub is_submitter: bool,
    pub stickied: bool,
    pub gilded: i64,
    pub distinguished: Option<String>,
    pub permalink: String,
    pub created_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

/// The fields of a child that a re-fetch may refresh
#[derive(Debug, Clone, PartialEq)]
pub struct ChildMutableFields {
    pub body: String,
    pub score: i64,
    pub edited: bool,
    pub stickied: bool,
    pub gilded: i64,
    pub distinguished: Option<String>,
}

impl ChildRecord {
    pub fn mutable_fields(&self) -> ChildMutableFields {
        ChildMutableFields {
            body: self.body.clone(),
            score: self.score,
            edited: self.edited,
            stickied: self.stickied,
            gilded: self.gilded,
            distinguished: self.distinguished.clone(),
        }
    }
}

/// Per-kind merge tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    pub inserted: u32,
    pub updated: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl MergeCounts {
    pub fn attempted(&self) -> u32 {
        self.inserted + self.updated + self.skipped + self.failed
    }

    /// Records that reached the store, whether or not anything changed
    pub fn stored(&self) -> u32 {
        self.inserted + self.updated + self.skipped
    }
}

/// One finished run of one target
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    /// Row id; 0 until inserted
    pub id: i64,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub items: MergeCounts,
    pub children: MergeCounts,
    /// Provider records dropped during translation
    pub skipped_invalid: u32,
    pub error: Option<String>,
}
