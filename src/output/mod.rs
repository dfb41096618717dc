//! Output module for operator-facing reports
//!
//! This module handles:
//! - Printing harvest statistics from the store
//! - Rebuilding reply forests from flat child rows

mod forest;
pub mod stats;

pub use forest::{build_forest, ChildNode, Forest};
pub use stats::{load_statistics, print_statistics, HarvestStatistics, TargetStatistics};

use crate::storage::Storage;
use crate::HarvestError;

/// Loads the stored children of an item and rebuilds their reply forest
///
/// # Arguments
///
/// * `storage` - The storage backend to read from
/// * `item_id` - Item whose children to project
///
/// # Returns
///
/// * `Ok(Forest)` - The forest; empty when nothing is stored for the item
/// * `Err(HarvestError)` - Failed to read the children
pub fn load_forest(storage: &dyn Storage, item_id: &str) -> Result<Forest, HarvestError> {
    let children = storage.get_children_for_item(item_id)?;
    Ok(build_forest(item_id, children))
}
