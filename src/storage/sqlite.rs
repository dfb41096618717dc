//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::provider::{Listing, TimeWindow};
use crate::state::{RateLimitState, RunOutcome};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{ChildRecord, ItemRecord, MergeCounts, RunRecord, TargetRecord};
use crate::HarvestError;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

const TARGET_COLUMNS: &str = "name, credential, listing, time_window, interval_secs,
    max_items_per_run, fetch_children, max_children_per_item, max_child_depth, active,
    last_run, next_run, needs_attention";

const ITEM_COLUMNS: &str = "id, target, title, body, author, url, permalink, domain, score,
    ratio, num_comments, is_self, is_video, over_18, spoiler, stickied, locked, archived,
    edited, gilded, distinguished, flair, post_hint, thumbnail, created_at, fetched_at";

const CHILD_COLUMNS: &str = "id, item_id, parent_child_id, depth, target, body, author, score,
    edited, is_submitter, stickied, gilded, distinguished, permalink, created_at, fetched_at";

const RUN_COLUMNS: &str = "id, target, started_at, finished_at, outcome,
    items_inserted, items_updated, items_skipped, items_failed,
    children_inserted, children_updated, children_skipped, children_failed,
    skipped_invalid, error";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(HarvestError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        let conn = init_database(path)?;
        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

impl Storage for SqliteStorage {
    // ===== Targets =====

    fn upsert_target_config(&mut self, target: &TargetRecord) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO targets (name, credential, listing, time_window, interval_secs,
                max_items_per_run, fetch_children, max_children_per_item, max_child_depth, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(name) DO UPDATE SET
                credential = excluded.credential,
                listing = excluded.listing,
                time_window = excluded.time_window,
                interval_secs = excluded.interval_secs,
                max_items_per_run = excluded.max_items_per_run,
                fetch_children = excluded.fetch_children,
                max_children_per_item = excluded.max_children_per_item,
                max_child_depth = excluded.max_child_depth",
            params![
                target.name,
                target.credential,
                target.listing.to_db_string(),
                target.time_window.to_db_string(),
                target.interval_secs as i64,
                target.max_items_per_run,
                target.fetch_children,
                target.max_children_per_item,
                target.max_child_depth,
                target.active,
            ],
        )?;
        Ok(())
    }

    fn get_target(&self, name: &str) -> StorageResult<Option<TargetRecord>> {
        let sql = format!("SELECT {} FROM targets WHERE name = ?1", TARGET_COLUMNS);
        let target = self
            .conn
            .query_row(&sql, params![name], row_to_target)
            .optional()?;
        Ok(target)
    }

    fn list_targets(&self) -> StorageResult<Vec<TargetRecord>> {
        let sql = format!("SELECT {} FROM targets ORDER BY name", TARGET_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let targets = stmt
            .query_map([], row_to_target)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(targets)
    }

    fn set_target_active(&mut self, name: &str, active: bool) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE targets SET active = ?1 WHERE name = ?2",
            params![active, name],
        )?;
        if changed == 0 {
            return Err(StorageError::TargetNotFound(name.to_string()));
        }
        Ok(())
    }

    fn record_target_schedule(
        &mut self,
        name: &str,
        last_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
        needs_attention: bool,
    ) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE targets SET last_run = ?1, next_run = ?2, needs_attention = ?3 WHERE name = ?4",
            params![
                format_time(&last_run),
                format_time(&next_run),
                needs_attention,
                name
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::TargetNotFound(name.to_string()));
        }
        Ok(())
    }

    // ===== Items =====

    fn get_item(&self, id: &str) -> StorageResult<Option<ItemRecord>> {
        let sql = format!("SELECT {} FROM items WHERE id = ?1", ITEM_COLUMNS);
        let item = self
            .conn
            .query_row(&sql, params![id], row_to_item)
            .optional()?;
        Ok(item)
    }

    fn insert_item(&mut self, item: &ItemRecord) -> StorageResult<()> {
        let sql = format!(
            "INSERT INTO items ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
             ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
            ITEM_COLUMNS
        );
        self.conn.execute(
            &sql,
            params![
                item.id,
                item.target,
                item.title,
                item.body,
                item.author,
                item.url,
                item.permalink,
                item.domain,
                item.score,
                item.ratio,
                item.num_comments,
                item.is_self,
                item.is_video,
                item.over_18,
                item.spoiler,
                item.stickied,
                item.locked,
                item.archived,
                item.edited,
                item.gilded,
                item.distinguished,
                item.flair,
                item.post_hint,
                item.thumbnail,
                format_time(&item.created_at),
                format_time(&item.fetched_at),
            ],
        )?;
        Ok(())
    }

    fn update_item_mutable(
        &mut self,
        item: &ItemRecord,
        refreshed_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE items SET body = ?1, score = ?2, ratio = ?3, num_comments = ?4,
                over_18 = ?5, spoiler = ?6, stickied = ?7, locked = ?8, archived = ?9,
                edited = ?10, gilded = ?11, distinguished = ?12, flair = ?13, refreshed_at = ?14
             WHERE id = ?15",
            params![
                item.body,
                item.score,
                item.ratio,
                item.num_comments,
                item.over_18,
                item.spoiler,
                item.stickied,
                item.locked,
                item.archived,
                item.edited,
                item.gilded,
                item.distinguished,
                item.flair,
                format_time(&refreshed_at),
                item.id,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::ItemNotFound(item.id.clone()));
        }
        Ok(())
    }

    fn count_items(&self, target: Option<&str>) -> StorageResult<i64> {
        count_rows(&self.conn, "items", target)
    }

    // ===== Children =====

    fn get_child(&self, id: &str) -> StorageResult<Option<ChildRecord>> {
        let sql = format!("SELECT {} FROM children WHERE id = ?1", CHILD_COLUMNS);
        let child = self
            .conn
            .query_row(&sql, params![id], row_to_child)
            .optional()?;
        Ok(child)
    }

    fn insert_child(&mut self, child: &ChildRecord) -> StorageResult<()> {
        let sql = format!(
            "INSERT INTO children ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
             ?12, ?13, ?14, ?15, ?16)",
            CHILD_COLUMNS
        );
        self.conn.execute(
            &sql,
            params![
                child.id,
                child.item_id,
                child.parent_child_id,
                child.depth,
                child.target,
                child.body,
                child.author,
                child.score,
                child.edited,
                child.is_submitter,
                child.stickied,
                child.gilded,
                child.distinguished,
                child.permalink,
                format_time(&child.created_at),
                format_time(&child.fetched_at),
            ],
        )?;
        Ok(())
    }

    fn update_child_mutable(
        &mut self,
        child: &ChildRecord,
        refreshed_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE children SET body = ?1, score = ?2, edited = ?3, stickied = ?4,
                gilded = ?5, distinguished = ?6, refreshed_at = ?7
             WHERE id = ?8",
            params![
                child.body,
                child.score,
                child.edited,
                child.stickied,
                child.gilded,
                child.distinguished,
                format_time(&refreshed_at),
                child.id,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::Database(format!(
                "Child {} vanished before update",
                child.id
            )));
        }
        Ok(())
    }

    fn get_children_for_item(&self, item_id: &str) -> StorageResult<Vec<ChildRecord>> {
        let sql = format!(
            "SELECT {} FROM children WHERE item_id = ?1 ORDER BY depth, created_at, id",
            CHILD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let children = stmt
            .query_map(params![item_id], row_to_child)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(children)
    }

    fn count_children(&self, target: Option<&str>) -> StorageResult<i64> {
        count_rows(&self.conn, "children", target)
    }

    // ===== Rate Limits =====

    fn save_rate_limit(
        &mut self,
        credential_key: &str,
        state: &RateLimitState,
    ) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO rate_limits
                (credential_key, remaining, reset_at, limit_total, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                credential_key,
                state.remaining,
                format_time(&state.reset_at),
                state.limit_total,
                format_time(&state.checked_at),
            ],
        )?;
        Ok(())
    }

    fn load_rate_limits(&self) -> StorageResult<HashMap<String, RateLimitState>> {
        let mut stmt = self.conn.prepare(
            "SELECT credential_key, remaining, reset_at, limit_total, checked_at FROM rate_limits",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                RateLimitState {
                    remaining: row.get(1)?,
                    reset_at: parse_time(row, 2)?,
                    limit_total: row.get(3)?,
                    checked_at: parse_time(row, 4)?,
                },
            ))
        })?;

        let mut states = HashMap::new();
        for row in rows {
            let (key, state) = row?;
            states.insert(key, state);
        }
        Ok(states)
    }

    // ===== Runs =====

    fn insert_run(&mut self, run: &RunRecord) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO runs (target, started_at, finished_at, outcome,
                items_inserted, items_updated, items_skipped, items_failed,
                children_inserted, children_updated, children_skipped, children_failed,
                skipped_invalid, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                run.target,
                format_time(&run.started_at),
                format_time(&run.finished_at),
                run.outcome.to_db_string(),
                run.items.inserted,
                run.items.updated,
                run.items.skipped,
                run.items.failed,
                run.children.inserted,
                run.children.updated,
                run.children.skipped,
                run.children.failed,
                run.skipped_invalid,
                run.error,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn recent_runs(&self, target: Option<&str>, limit: u32) -> StorageResult<Vec<RunRecord>> {
        let runs = match target {
            Some(target) => {
                let sql = format!(
                    "SELECT {} FROM runs WHERE target = ?1 ORDER BY id DESC LIMIT ?2",
                    RUN_COLUMNS
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map(params![target, limit], row_to_run)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let sql = format!("SELECT {} FROM runs ORDER BY id DESC LIMIT ?1", RUN_COLUMNS);
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map(params![limit], row_to_run)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(runs)
    }
}

/// Initializes a new database with schema
///
/// # Arguments
///
/// * `path` - Path to the database file
///
/// # Returns
///
/// * `Ok(Connection)` - Successfully initialized database
/// * `Err(rusqlite::Error)` - Failed to initialize
pub fn init_database(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
    ",
    )?;

    initialize_schema(&conn)?;

    Ok(conn)
}

// Fixed-width UTC text so ORDER BY on timestamp columns is chronological.
fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_optional_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => parse_time(row, idx).map(Some),
        None => Ok(None),
    }
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn row_to_target(row: &Row<'_>) -> rusqlite::Result<TargetRecord> {
    let listing: String = row.get(2)?;
    let window: String = row.get(3)?;
    Ok(TargetRecord {
        name: row.get(0)?,
        credential: row.get(1)?,
        listing: Listing::from_db_string(&listing)
            .ok_or_else(|| conversion_error(2, format!("unknown listing {}", listing)))?,
        time_window: TimeWindow::from_db_string(&window)
            .ok_or_else(|| conversion_error(3, format!("unknown time window {}", window)))?,
        interval_secs: row.get::<_, i64>(4)?.max(0) as u64,
        max_items_per_run: row.get(5)?,
        fetch_children: row.get(6)?,
        max_children_per_item: row.get(7)?,
        max_child_depth: row.get(8)?,
        active: row.get(9)?,
        last_run: parse_optional_time(row, 10)?,
        next_run: parse_optional_time(row, 11)?,
        needs_attention: row.get(12)?,
    })
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<ItemRecord> {
    Ok(ItemRecord {
        id: row.get(0)?,
        target: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        author: row.get(4)?,
        url: row.get(5)?,
        permalink: row.get(6)?,
        domain: row.get(7)?,
        score: row.get(8)?,
        ratio: row.get(9)?,
        num_comments: row.get(10)?,
        is_self: row.get(11)?,
        is_video: row.get(12)?,
        over_18: row.get(13)?,
        spoiler: row.get(14)?,
        stickied: row.get(15)?,
        locked: row.get(16)?,
        archived: row.get(17)?,
        edited: row.get(18)?,
        gilded: row.get(19)?,
        distinguished: row.get(20)?,
        flair: row.get(21)?,
        post_hint: row.get(22)?,
        thumbnail: row.get(23)?,
        created_at: parse_time(row, 24)?,
        fetched_at: parse_time(row, 25)?,
    })
}

fn row_to_child(row: &Row<'_>) -> rusqlite::Result<ChildRecord> {
    Ok(ChildRecord {
        id: row.get(0)?,
        item_id: row.get(1)?,
        parent_child_id: row.get(2)?,
        depth: row.get(3)?,
        target: row.get(4)?,
        body: row.get(5)?,
        author: row.get(6)?,
        score: row.get(7)?,
        edited: row.get(8)?,
        is_submitter: row.get(9)?,
        stickied: row.get(10)?,
        gilded: row.get(11)?,
        distinguished: row.get(12)?,
        permalink: row.get(13)?,
        created_at: parse_time(row, 14)?,
        fetched_at: parse_time(row, 15)?,
    })
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let outcome: String = row.get(4)?;
    Ok(RunRecord {
        id: row.get(0)?,
        target: row.get(1)?,
        started_at: parse_time(row, 2)?,
        finished_at: parse_time(row, 3)?,
        outcome: RunOutcome::from_db_string(&outcome)
            .ok_or_else(|| conversion_error(4, format!("unknown outcome {}", outcome)))?,
        items: MergeCounts {
            inserted: row.get(5)?,
            updated: row.get(6)?,
            skipped: row.get(7)?,
            failed: row.get(8)?,
        },
        children: MergeCounts {
            inserted: row.get(9)?,
            updated: row.get(10)?,
            skipped: row.get(11)?,
            failed: row.get(12)?,
        },
        skipped_invalid: row.get(13)?,
        error: row.get(14)?,
    })
}

fn count_rows(conn: &Connection, table: &str, target: Option<&str>) -> StorageResult<i64> {
    let count = match target {
        Some(target) => conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE target = ?1", table),
            params![target],
            |row| row.get(0),
        )?,
        None => conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })?,
    };
    Ok(count)
}
