//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the harvester database.
//! Children deliberately carry no foreign key to items: a child may be stored
//! before its item.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Configured targets and their schedule bookkeeping
CREATE TABLE IF NOT EXISTS targets (
    name TEXT PRIMARY KEY,
    credential TEXT NOT NULL,
    listing TEXT NOT NULL,
    time_window TEXT NOT NULL,
    interval_secs INTEGER NOT NULL,
    max_items_per_run INTEGER NOT NULL,
    fetch_children INTEGER NOT NULL,
    max_children_per_item INTEGER NOT NULL,
    max_child_depth INTEGER NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 1,
    last_run TEXT,
    next_run TEXT,
    needs_attention INTEGER NOT NULL DEFAULT 0
);

-- Posts
CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    target TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    author TEXT NOT NULL,
    url TEXT NOT NULL,
    permalink TEXT NOT NULL,
    domain TEXT NOT NULL,
    score INTEGER NOT NULL,
    ratio REAL NOT NULL,
    num_comments INTEGER NOT NULL,
    is_self INTEGER NOT NULL,
    is_video INTEGER NOT NULL,
    over_18 INTEGER NOT NULL,
    spoiler INTEGER NOT NULL,
    stickied INTEGER NOT NULL,
    locked INTEGER NOT NULL,
    archived INTEGER NOT NULL,
    edited INTEGER NOT NULL,
    gilded INTEGER NOT NULL,
    distinguished TEXT,
    flair TEXT,
    post_hint TEXT,
    thumbnail TEXT,
    created_at TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    refreshed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_items_target ON items(target);
CREATE INDEX IF NOT EXISTS idx_items_created ON items(created_at);

-- Comments, flat with parent pointers
CREATE TABLE IF NOT EXISTS children (
    id TEXT PRIMARY KEY,
    item_id TEXT NOT NULL,
    parent_child_id TEXT,
    depth INTEGER NOT NULL,
    target TEXT NOT NULL,
    body TEXT NOT NULL,
    author TEXT NOT NULL,
    score INTEGER NOT NULL,
    edited INTEGER NOT NULL,
    is_submitter INTEGER NOT NULL,
    stickied INTEGER NOT NULL,
    gilded INTEGER NOT NULL,
    distinguished TEXT,
    permalink TEXT NOT NULL,
    created_at TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    refreshed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_children_item ON children(item_id);
CREATE INDEX IF NOT EXISTS idx_children_target ON children(target);

-- Last quota report per credential key
CREATE TABLE IF NOT EXISTS rate_limits (
    credential_key TEXT PRIMARY KEY,
    remaining INTEGER NOT NULL,
    reset_at TEXT NOT NULL,
    limit_total INTEGER NOT NULL,
    checked_at TEXT NOT NULL
);

-- Run history
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    outcome TEXT NOT NULL,
    items_inserted INTEGER NOT NULL DEFAULT 0,
    items_updated INTEGER NOT NULL DEFAULT 0,
    items_skipped INTEGER NOT NULL DEFAULT 0,
    items_failed INTEGER NOT NULL DEFAULT 0,
    children_inserted INTEGER NOT NULL DEFAULT 0,
    children_updated INTEGER NOT NULL DEFAULT 0,
    children_skipped INTEGER NOT NULL DEFAULT 0,
    children_failed INTEGER NOT NULL DEFAULT 0,
    skipped_invalid INTEGER NOT NULL DEFAULT 0,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_target ON runs(target);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_schema(&conn).unwrap();
        let result = initialize_schema(&conn);

        assert!(result.is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["targets", "items", "children", "rate_limits", "runs"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }
}
