//! Self-healing for structurally invalid trees.
//!
//! Stored and fetched trees can carry leftovers from interrupted writes or
//! older clients: null slots, references to deleted notes, items listing
//! themselves, children claimed by two parents. Repair drops those references
//! and never fails. Running it twice gives the same tree as running it once.

use crate::model::{TreeItem, TreeModel};
use std::collections::HashSet;
use std::fmt;

/// Why a child reference was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Null or empty id.
    Empty,
    SelfReference,
    /// Id with no item in the map.
    Dangling,
    /// Listed more than once by the same parent.
    Duplicate,
    /// The root can't be anyone's child.
    RootReference,
    /// Already claimed by an earlier parent.
    SecondParent,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DropReason::Empty => "empty id",
            DropReason::SelfReference => "self reference",
            DropReason::Dangling => "dangling reference",
            DropReason::Duplicate => "duplicate reference",
            DropReason::RootReference => "reference to root",
            DropReason::SecondParent => "second parent",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedChild {
    pub parent: String,
    pub child: String,
    pub reason: DropReason,
}

/// Everything repair changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub root_recreated: bool,
    pub dropped: Vec<DroppedChild>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        !self.root_recreated && self.dropped.is_empty()
    }

    pub fn total_changes(&self) -> usize {
        self.dropped.len() + usize::from(self.root_recreated)
    }
}

/// Repairs `tree`, discarding the report.
pub fn repair_tree(tree: TreeModel) -> TreeModel {
    repair_tree_with_report(tree).0
}

/// Repairs `tree` and describes what was dropped.
///
/// Parents are visited depth-first from the root, then the unreachable items
/// in key order, so a child claimed twice stays with the parent that is
/// closest to the visible tree.
pub fn repair_tree_with_report(mut tree: TreeModel) -> (TreeModel, RepairReport) {
    let mut report = RepairReport::default();

    if !tree.contains(&tree.root_id) {
        tree.insert(TreeItem::new(tree.root_id.clone()));
        report.root_recreated = true;
    }

    let known: HashSet<String> = tree.items.keys().cloned().collect();
    let mut claimed: HashSet<String> = HashSet::with_capacity(known.len());

    for parent_id in claim_order(&tree) {
        let Some(item) = tree.items.get_mut(&parent_id) else {
            continue;
        };

        let mut listed = HashSet::new();
        let mut kept = Vec::with_capacity(item.children.len());
        for child in item.children.drain(..) {
            let reason = if child.is_empty() {
                Some(DropReason::Empty)
            } else if child == parent_id {
                Some(DropReason::SelfReference)
            } else if child == tree.root_id {
                Some(DropReason::RootReference)
            } else if !known.contains(&child) {
                Some(DropReason::Dangling)
            } else if listed.contains(&child) {
                Some(DropReason::Duplicate)
            } else if claimed.contains(&child) {
                Some(DropReason::SecondParent)
            } else {
                None
            };

            match reason {
                Some(reason) => report.dropped.push(DroppedChild {
                    parent: parent_id.clone(),
                    child,
                    reason,
                }),
                None => {
                    listed.insert(child.clone());
                    claimed.insert(child.clone());
                    kept.push(child);
                }
            }
        }
        item.children = kept;
    }

    (tree, report)
}

/// Root first, then depth-first through children, then everything else.
fn claim_order(tree: &TreeModel) -> Vec<String> {
    let mut order = Vec::with_capacity(tree.len());
    let mut seen = HashSet::new();
    let mut stack = vec![tree.root_id.as_str()];

    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        let Some(item) = tree.get(id) else {
            continue;
        };
        order.push(id.to_string());
        stack.extend(item.children.iter().rev().map(String::as_str));
    }

    order.extend(
        tree.items
            .keys()
            .filter(|id| !seen.contains(id.as_str()))
            .cloned(),
    );
    order
}
