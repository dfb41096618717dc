//! Merge/upsert engine
//!
//! Decides per record whether to insert, refresh mutable fields, or leave the
//! stored row alone. The storage lock is held for one record's
//! read-compare-write and released in between, so concurrent merges of the
//! same id from different targets serialize per record.

use crate::storage::{ChildRecord, ItemRecord, MergeCounts, SqliteStorage, Storage, StorageError, StorageResult};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{trace, warn};

/// What a single upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    Inserted,
    Updated,
    Skipped,
}

/// Tallies for one merge call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub items: MergeCounts,
    pub children: MergeCounts,
}

impl MergeReport {
    /// More than half of the attempted records failed to store
    pub fn is_majority_failure(&self) -> bool {
        let attempted = self.items.attempted() + self.children.attempted();
        let failed = self.items.failed + self.children.failed;
        attempted > 0 && failed * 2 > attempted
    }
}

fn tally(counts: &mut MergeCounts, result: &StorageResult<MergeAction>) {
    match result {
        Ok(MergeAction::Inserted) => counts.inserted += 1,
        Ok(MergeAction::Updated) => counts.updated += 1,
        Ok(MergeAction::Skipped) => counts.skipped += 1,
        Err(_) => counts.failed += 1,
    }
}

/// Upserts fetched records into a shared store
pub struct MergeEngine<S: Storage = SqliteStorage> {
    storage: Arc<Mutex<S>>,
}

impl<S: Storage> Clone for MergeEngine<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: Storage> MergeEngine<S> {
    pub fn new(storage: Arc<Mutex<S>>) -> Self {
        Self { storage }
    }

    /// Merges a batch, each item followed by its children
    ///
    /// Failures are counted per record and never stop the batch. Children
    /// keyed by an item absent from `items` are merged after all items.
    pub fn merge(
        &self,
        items: &[ItemRecord],
        children_by_item: &BTreeMap<String, Vec<ChildRecord>>,
    ) -> MergeReport {
        let mut report = MergeReport::default();

        for item in items {
            let result = self.merge_item(item);
            if let Err(e) = &result {
                warn!(item = %item.id, error = %e, "Failed to store item");
            }
            tally(&mut report.items, &result);

            if let Some(children) = children_by_item.get(&item.id) {
                self.merge_children(children, &mut report.children);
            }
        }

        for (item_id, children) in children_by_item {
            if !items.iter().any(|item| &item.id == item_id) {
                self.merge_children(children, &mut report.children);
            }
        }

        report
    }

    fn merge_children(&self, children: &[ChildRecord], counts: &mut MergeCounts) {
        for child in children {
            let result = self.merge_child(child);
            if let Err(e) = &result {
                warn!(child = %child.id, error = %e, "Failed to store child");
            }
            tally(counts, &result);
        }
    }

    /// Upserts one item
    ///
    /// An existing item only has its mutable fields overwritten, and only
    /// when at least one of them differs.
    pub fn merge_item(&self, item: &ItemRecord) -> StorageResult<MergeAction> {
        let mut storage = self.lock()?;

        match storage.get_item(&item.id)? {
            None => {
                storage.insert_item(item)?;
                trace!(item = %item.id, "Inserted item");
                Ok(MergeAction::Inserted)
            }
            Some(existing) if existing.mutable_fields() == item.mutable_fields() => {
                Ok(MergeAction::Skipped)
            }
            Some(_) => {
                storage.update_item_mutable(item, item.fetched_at)?;
                trace!(item = %item.id, "Refreshed item");
                Ok(MergeAction::Updated)
            }
        }
    }

    /// Upserts one child; its item need not be stored
    pub fn merge_child(&self, child: &ChildRecord) -> StorageResult<MergeAction> {
        let mut storage = self.lock()?;

        match storage.get_child(&child.id)? {
            None => {
                storage.insert_child(child)?;
                Ok(MergeAction::Inserted)
            }
            Some(existing) if existing.mutable_fields() == child.mutable_fields() => {
                Ok(MergeAction::Skipped)
            }
            Some(_) => {
                storage.update_child_mutable(child, child.fetched_at)?;
                Ok(MergeAction::Updated)
            }
        }
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, S>> {
        self.storage
            .lock()
            .map_err(|_| StorageError::Database("storage lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::testing::{raw_child, raw_item};
    use crate::harvest::translate::{translate_child, translate_item};
    use crate::state::RateLimitState;
    use crate::storage::{RunRecord, TargetRecord};
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;

    fn engine() -> (MergeEngine, Arc<Mutex<SqliteStorage>>) {
        let storage = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        (MergeEngine::new(storage.clone()), storage)
    }

    fn item(id: &str, score: i64) -> ItemRecord {
        translate_item(raw_item(id, score), "rust", Utc::now()).unwrap()
    }

    fn child(id: &str, item_id: &str, parent: Option<&str>) -> ChildRecord {
        translate_child(raw_child(id, item_id, parent), item_id, "rust", Utc::now()).unwrap()
    }

    #[test]
    fn test_clean_merge_inserts_everything() {
        let (engine, storage) = engine();
        let items = vec![item("p1", 10), item("p2", 20)];
        let mut children = BTreeMap::new();
        children.insert("p1".to_string(), vec![child("c1", "p1", None)]);

        let report = engine.merge(&items, &children);

        assert_eq!(report.items.inserted, 2);
        assert_eq!(report.children.inserted, 1);
        assert!(!report.is_majority_failure());
        assert_eq!(storage.lock().unwrap().count_items(None).unwrap(), 2);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let (engine, storage) = engine();
        let items = vec![item("p1", 10), item("p2", 20)];
        let mut children = BTreeMap::new();
        children.insert("p1".to_string(), vec![child("c1", "p1", None)]);

        engine.merge(&items, &children);
        let before = storage.lock().unwrap().get_item("p1").unwrap();

        let report = engine.merge(&items, &children);
        assert_eq!(report.items.skipped, 2);
        assert_eq!(report.children.skipped, 1);
        assert_eq!(report.items.inserted + report.items.updated, 0);
        assert_eq!(storage.lock().unwrap().get_item("p1").unwrap(), before);
    }

    #[test]
    fn test_one_score_change_updates_one() {
        let (engine, storage) = engine();
        engine.merge(&[item("p1", 10), item("p2", 20)], &BTreeMap::new());

        let mut rerun = vec![item("p1", 10), item("p2", 25)];
        rerun[1].author = "impostor".to_string();
        let report = engine.merge(&rerun, &BTreeMap::new());

        assert_eq!(report.items.updated, 1);
        assert_eq!(report.items.skipped, 1);

        let stored = storage.lock().unwrap().get_item("p2").unwrap().unwrap();
        assert_eq!(stored.score, 25);
        assert_eq!(stored.author, "poster");
    }

    #[test]
    fn test_child_before_item_is_tolerated() {
        let (engine, storage) = engine();
        let mut children = BTreeMap::new();
        children.insert("p9".to_string(), vec![child("c1", "p9", None)]);

        let report = engine.merge(&[], &children);
        assert_eq!(report.children.inserted, 1);

        let report = engine.merge(&[item("p9", 1)], &children);
        assert_eq!(report.items.inserted, 1);
        assert_eq!(report.children.skipped, 1);

        let stored = storage.lock().unwrap().get_children_for_item("p9").unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn test_concurrent_merges_of_same_ids() {
        let (engine, storage) = engine();
        let items = vec![item("p1", 10)];
        let mut children = BTreeMap::new();
        children.insert("p1".to_string(), vec![child("c1", "p1", None)]);

        let reports: Vec<MergeReport> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let engine = engine.clone();
                    let (items, children) = (&items, &children);
                    scope.spawn(move || engine.merge(items, children))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let inserted: u32 = reports.iter().map(|r| r.items.inserted).sum();
        let skipped: u32 = reports.iter().map(|r| r.items.skipped).sum();
        assert_eq!(inserted, 1);
        assert_eq!(skipped, 1);

        let child_inserted: u32 = reports.iter().map(|r| r.children.inserted).sum();
        let child_skipped: u32 = reports.iter().map(|r| r.children.skipped).sum();
        assert_eq!(child_inserted, 1);
        assert_eq!(child_skipped, 1);

        let storage = storage.lock().unwrap();
        assert_eq!(storage.count_items(None).unwrap(), 1);
        assert_eq!(storage.count_children(None).unwrap(), 1);
    }

    #[test]
    fn test_edited_child_refreshed() {
        let (engine, storage) = engine();
        engine.merge_child(&child("c1", "p1", None)).unwrap();

        let mut edited = child("c1", "p1", None);
        edited.body = "changed my mind".to_string();
        edited.edited = true;
        assert_eq!(engine.merge_child(&edited).unwrap(), MergeAction::Updated);

        let stored = storage.lock().unwrap().get_child("c1").unwrap().unwrap();
        assert!(stored.edited);
    }

    #[test]
    fn test_majority_failure() {
        let mut report = MergeReport::default();
        assert!(!report.is_majority_failure());

        report.items.failed = 2;
        report.items.inserted = 1;
        assert!(report.is_majority_failure());

        report.children.inserted = 2;
        assert!(!report.is_majority_failure());
    }

    /// Storage whose writes always fail
    struct BrokenStorage;

    impl Storage for BrokenStorage {
        fn upsert_target_config(&mut self, _: &TargetRecord) -> StorageResult<()> {
            unimplemented!()
        }
        fn get_target(&self, _: &str) -> StorageResult<Option<TargetRecord>> {
            unimplemented!()
        }
        fn list_targets(&self) -> StorageResult<Vec<TargetRecord>> {
            unimplemented!()
        }
        fn set_target_active(&mut self, _: &str, _: bool) -> StorageResult<()> {
            unimplemented!()
        }
        fn record_target_schedule(
            &mut self,
            _: &str,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
            _: bool,
        ) -> StorageResult<()> {
            unimplemented!()
        }
        fn get_item(&self, _: &str) -> StorageResult<Option<ItemRecord>> {
            Ok(None)
        }
        fn insert_item(&mut self, _: &ItemRecord) -> StorageResult<()> {
            Err(StorageError::Database("disk full".to_string()))
        }
        fn update_item_mutable(&mut self, _: &ItemRecord, _: DateTime<Utc>) -> StorageResult<()> {
            Err(StorageError::Database("disk full".to_string()))
        }
        fn count_items(&self, _: Option<&str>) -> StorageResult<i64> {
            Ok(0)
        }
        fn get_child(&self, _: &str) -> StorageResult<Option<ChildRecord>> {
            Ok(None)
        }
        fn insert_child(&mut self, _: &ChildRecord) -> StorageResult<()> {
            Err(StorageError::Database("disk full".to_string()))
        }
        fn update_child_mutable(&mut self, _: &ChildRecord, _: DateTime<Utc>) -> StorageResult<()> {
            Err(StorageError::Database("disk full".to_string()))
        }
        fn get_children_for_item(&self, _: &str) -> StorageResult<Vec<ChildRecord>> {
            Ok(Vec::new())
        }
        fn count_children(&self, _: Option<&str>) -> StorageResult<i64> {
            Ok(0)
        }
        fn save_rate_limit(&mut self, _: &str, _: &RateLimitState) -> StorageResult<()> {
            unimplemented!()
        }
        fn load_rate_limits(&self) -> StorageResult<HashMap<String, RateLimitState>> {
            unimplemented!()
        }
        fn insert_run(&mut self, _: &RunRecord) -> StorageResult<i64> {
            unimplemented!()
        }
        fn recent_runs(&self, _: Option<&str>, _: u32) -> StorageResult<Vec<RunRecord>> {
            unimplemented!()
        }
    }

    #[test]
    fn test_store_failures_counted_not_fatal() {
        let engine = MergeEngine::new(Arc::new(Mutex::new(BrokenStorage)));
        let mut children = BTreeMap::new();
        children.insert("p1".to_string(), vec![child("c1", "p1", None)]);

        let report = engine.merge(&[item("p1", 1), item("p2", 2)], &children);

        assert_eq!(report.items.failed, 2);
        assert_eq!(report.children.failed, 1);
        assert!(report.is_majority_failure());
    }
}
