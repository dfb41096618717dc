//! Reply-tree projection of stored children
//!
//! Children are stored flat with a parent pointer. This module rebuilds the
//! trees under one item for display and JSON export.

use crate::storage::ChildRecord;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// A child with its direct replies
#[derive(Debug, Clone, Serialize)]
pub struct ChildNode {
    #[serde(flatten)]
    pub child: ChildRecord,
    pub replies: Vec<ChildNode>,
}

impl ChildNode {
    /// Nodes in this subtree, including this one
    pub fn len(&self) -> usize {
        1 + self.replies.iter().map(ChildNode::len).sum::<usize>()
    }
}

/// Every reply tree under one item
#[derive(Debug, Clone, Serialize)]
pub struct Forest {
    pub item_id: String,
    /// Top-level children and their replies
    pub roots: Vec<ChildNode>,
    /// Subtrees whose parent is not among the stored children
    pub orphans: Vec<ChildNode>,
}

impl Forest {
    pub fn len(&self) -> usize {
        self.roots.iter().chain(&self.orphans).map(ChildNode::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty() && self.orphans.is_empty()
    }
}

/// Builds the reply forest of `item_id` from flat child rows
///
/// Rows belonging to other items are ignored. Sibling order follows the
/// input order. A child whose parent is missing starts an orphan subtree;
/// children caught in a parent cycle are reported as orphans too.
pub fn build_forest(item_id: &str, children: Vec<ChildRecord>) -> Forest {
    let children: Vec<ChildRecord> = children
        .into_iter()
        .filter(|child| child.item_id == item_id)
        .collect();

    let ids: HashSet<String> = children.iter().map(|child| child.id.clone()).collect();

    let mut order = Vec::with_capacity(children.len());
    let mut replies: HashMap<String, Vec<String>> = HashMap::new();
    let mut roots = Vec::new();
    let mut orphans = Vec::new();

    for child in &children {
        order.push(child.id.clone());
        match &child.parent_child_id {
            None => roots.push(child.id.clone()),
            Some(parent) if parent != &child.id && ids.contains(parent) => {
                replies.entry(parent.clone()).or_default().push(child.id.clone());
            }
            Some(_) => orphans.push(child.id.clone()),
        }
    }

    let mut records: HashMap<String, ChildRecord> = children
        .into_iter()
        .map(|child| (child.id.clone(), child))
        .collect();

    let roots = attach_all(&roots, &replies, &mut records);
    let mut orphans = attach_all(&orphans, &replies, &mut records);

    // Whatever is left is only reachable through a cycle.
    for id in order {
        if records.contains_key(&id) {
            if let Some(node) = attach(&id, &replies, &mut records) {
                orphans.push(node);
            }
        }
    }

    Forest {
        item_id: item_id.to_string(),
        roots,
        orphans,
    }
}

fn attach_all(
    ids: &[String],
    replies: &HashMap<String, Vec<String>>,
    records: &mut HashMap<String, ChildRecord>,
) -> Vec<ChildNode> {
    ids.iter()
        .filter_map(|id| attach(id, replies, records))
        .collect()
}

// Taking the record out of `records` marks it visited.
fn attach(
    id: &str,
    replies: &HashMap<String, Vec<String>>,
    records: &mut HashMap<String, ChildRecord>,
) -> Option<ChildNode> {
    let child = records.remove(id)?;
    let replies = match replies.get(id) {
        Some(ids) => attach_all(ids, replies, records),
        None => Vec::new(),
    };
    Some(ChildNode { child, replies })
}
