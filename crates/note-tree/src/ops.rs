//! Structural edits over tree snapshots.
//!
//! Every function takes the current snapshot by reference and returns a new
//! one; the input is never modified.

use crate::error::{Result, TreeError};
use crate::model::{ItemData, ItemPatch, NoteMeta, TreeItem, TreeModel};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A slot in some parent's children list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovePosition {
    pub parent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl MovePosition {
    pub fn at(parent_id: impl Into<String>, index: usize) -> Self {
        Self {
            parent_id: parent_id.into(),
            index: Some(index),
        }
    }

    /// The end of `parent_id`'s children.
    pub fn end_of(parent_id: impl Into<String>) -> Self {
        Self {
            parent_id: parent_id.into(),
            index: None,
        }
    }
}

/// Links `id` under `parent_id`, creating an empty item if `id` is unknown.
/// Linking twice under the same parent is a no-op.
pub fn add_item(tree: &TreeModel, id: &str, parent_id: &str) -> Result<TreeModel> {
    if id == parent_id {
        return Err(TreeError::InvalidMove(format!("'{id}' cannot be its own parent")));
    }
    if id == tree.root_id {
        return Err(TreeError::InvalidMove("the root cannot be given a parent".into()));
    }
    if !tree.contains(parent_id) {
        return Err(TreeError::ParentNotFound(parent_id.to_string()));
    }

    let mut next = tree.clone();
    next.items
        .entry(id.to_string())
        .or_insert_with(|| TreeItem::new(id));
    if let Some(parent) = next.items.get_mut(parent_id) {
        if !parent.children.iter().any(|child| child == id) {
            parent.children.push(id.to_string());
        }
    }
    Ok(next)
}

/// Detaches `id` from every children list. The item and its subtree stay in
/// the map so they can be restored later.
pub fn remove_item(tree: &TreeModel, id: &str) -> TreeModel {
    let mut next = tree.clone();
    for item in next.items.values_mut() {
        item.children.retain(|child| child != id);
    }
    next
}

/// Same as [`add_item`]; restoring a whole subtree is done by the caller.
pub fn restore_item(tree: &TreeModel, id: &str, parent_id: &str) -> Result<TreeModel> {
    add_item(tree, id, parent_id)
}

/// Moves the child at `source` to `destination`.
///
/// The destination index is the item's final position in the destination
/// list; it is clamped to the list length and `None` appends.
pub fn move_item(
    tree: &TreeModel,
    source: &MovePosition,
    destination: &MovePosition,
) -> Result<TreeModel> {
    let from = tree
        .get(&source.parent_id)
        .ok_or_else(|| TreeError::ParentNotFound(source.parent_id.clone()))?;
    let index = source
        .index
        .ok_or_else(|| TreeError::InvalidMove("source position has no index".into()))?;
    let id = from.children.get(index).cloned().ok_or_else(|| {
        TreeError::InvalidMove(format!(
            "'{}' has no child at index {index}",
            source.parent_id
        ))
    })?;

    if !tree.contains(&destination.parent_id) {
        return Err(TreeError::ParentNotFound(destination.parent_id.clone()));
    }
    if descendant_closure(tree, &id)
        .iter()
        .any(|member| *member == destination.parent_id)
    {
        return Err(TreeError::InvalidMove(format!(
            "cannot move '{id}' into itself or its descendant '{}'",
            destination.parent_id
        )));
    }

    let mut next = tree.clone();
    if let Some(parent) = next.items.get_mut(&source.parent_id) {
        parent.children.remove(index);
    }
    if let Some(parent) = next.items.get_mut(&destination.parent_id) {
        let at = destination
            .index
            .map_or(parent.children.len(), |i| i.min(parent.children.len()));
        parent.children.insert(at, id);
    }
    Ok(next)
}

/// Shallow-merges `patch` into item `id`. Unknown ids leave the tree as is.
pub fn mutate_item(tree: &TreeModel, id: &str, patch: ItemPatch) -> TreeModel {
    let mut next = tree.clone();
    let Some(item) = next.items.get_mut(id) else {
        return next;
    };

    if let Some(is_expanded) = patch.is_expanded {
        item.is_expanded = Some(is_expanded);
    }
    if let Some(children) = patch.children {
        item.children = children;
    }
    if let Some(data_patch) = patch.data {
        let current = item
            .data
            .take()
            .unwrap_or_else(|| ItemData::Metadata(NoteMeta::new(id)));
        let mut merged = current.merged(data_patch);
        if merged.meta().id.is_empty() {
            merged.meta_mut().id = id.to_string();
        }
        item.data = Some(merged);
    }
    next
}

/// Physically deletes `id` and everything below it, along with every
/// reference to the deleted ids. Deleting the root is ignored.
pub fn delete_item(tree: &TreeModel, id: &str) -> TreeModel {
    if id == tree.root_id {
        return tree.clone();
    }

    let closure = descendant_closure(tree, id);
    let doomed: HashSet<&str> = closure.iter().map(String::as_str).collect();

    let mut next = tree.clone();
    next.items.retain(|key, _| !doomed.contains(key.as_str()));
    for item in next.items.values_mut() {
        item.children.retain(|child| !doomed.contains(child.as_str()));
    }
    next
}

/// `id` followed by every id reachable through children lists, in depth-first
/// pre-order. Each id appears once, even if the tree contains cycles.
pub fn descendant_closure(tree: &TreeModel, id: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut closure = Vec::new();
    let mut worklist = vec![id];

    while let Some(current) = worklist.pop() {
        if !seen.insert(current) {
            continue;
        }
        closure.push(current.to_string());
        if let Some(item) = tree.get(current) {
            worklist.extend(item.children.iter().rev().map(String::as_str));
        }
    }
    closure
}

/// Lazy depth-first walk returned by [`flatten_tree`].
pub struct Flatten<'a> {
    tree: &'a TreeModel,
    stack: Vec<&'a str>,
    seen: HashSet<&'a str>,
}

impl<'a> Iterator for Flatten<'a> {
    type Item = &'a TreeItem;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            if !self.seen.insert(id) {
                continue;
            }
            let Some(item) = self.tree.get(id) else {
                continue;
            };
            self.stack.extend(item.children.iter().rev().map(String::as_str));
            return Some(item);
        }
        None
    }
}

/// Every item below `root_id` (the tree root when `None`) in depth-first
/// pre-order, excluding the start item itself.
pub fn flatten_tree<'a>(tree: &'a TreeModel, root_id: Option<&'a str>) -> Flatten<'a> {
    let start = root_id.unwrap_or(tree.root_id.as_str());
    let stack = tree
        .get(start)
        .map(|item| item.children.iter().rev().map(String::as_str).collect())
        .unwrap_or_default();
    Flatten {
        tree,
        stack,
        seen: HashSet::from([start]),
    }
}

/// Projection handed to external consumers: bodies reduced to metadata and
/// `is_expanded` always present.
pub fn clean_tree_model(tree: &TreeModel) -> TreeModel {
    let items = tree
        .items
        .iter()
        .map(|(key, item)| {
            let cleaned = TreeItem {
                id: item.id.clone(),
                children: item.children.clone(),
                is_expanded: Some(item.is_expanded.unwrap_or(false)),
                data: item
                    .data
                    .as_ref()
                    .map(|data| ItemData::Metadata(data.meta().clone())),
            };
            (key.clone(), cleaned)
        })
        .collect();
    TreeModel {
        root_id: tree.root_id.clone(),
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Note, NotePatch, ROOT_ID};

    /// root -> [a, b], a -> [c], c -> [d]
    fn sample_tree() -> TreeModel {
        let mut tree = TreeModel::default();
        tree.insert(TreeItem::new(ROOT_ID).with_children(["a", "b"]));
        tree.insert(TreeItem::new("a").with_children(["c"]));
        tree.insert(TreeItem::new("b"));
        tree.insert(TreeItem::new("c").with_children(["d"]));
        tree.insert(TreeItem::new("d"));
        tree
    }

    fn children<'a>(tree: &'a TreeModel, id: &str) -> Vec<&'a str> {
        tree.get(id)
            .map(|item| item.children.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    #[test]
    fn add_item_is_idempotent() {
        let tree = TreeModel::default();
        let once = add_item(&tree, "x", ROOT_ID).unwrap();
        let twice = add_item(&once, "x", ROOT_ID).unwrap();

        assert_eq!(children(&twice, ROOT_ID), vec!["x"]);
        assert!(twice.contains("x"));
        // input snapshot untouched
        assert!(!tree.contains("x"));
    }

    #[test]
    fn add_item_under_missing_parent_fails() {
        let tree = TreeModel::default();
        let err = add_item(&tree, "x", "nope").unwrap_err();
        assert_eq!(err, TreeError::ParentNotFound("nope".into()));
    }

    #[test]
    fn add_item_keeps_existing_item_data() {
        let mut tree = TreeModel::default();
        tree.insert(TreeItem::new("x").with_data(Note::new("x", "body")));

        let next = add_item(&tree, "x", ROOT_ID).unwrap();
        assert!(next.get("x").unwrap().is_loaded());
    }

    #[test]
    fn remove_item_keeps_subtree_in_map() {
        let next = remove_item(&sample_tree(), "a");

        assert_eq!(children(&next, ROOT_ID), vec!["b"]);
        assert!(next.contains("a"));
        assert_eq!(children(&next, "a"), vec!["c"]);
    }

    #[test]
    fn restore_relinks_removed_item() {
        let removed = remove_item(&sample_tree(), "a");
        let restored = restore_item(&removed, "a", "b").unwrap();

        assert_eq!(children(&restored, "b"), vec!["a"]);
        assert_eq!(children(&restored, "a"), vec!["c"]);
    }

    #[test]
    fn delete_item_removes_whole_subtree() {
        let next = delete_item(&sample_tree(), "a");

        for id in ["a", "c", "d"] {
            assert!(!next.contains(id), "{id} should be gone");
        }
        assert_eq!(children(&next, ROOT_ID), vec!["b"]);
        assert!(next.contains("b"));
    }

    #[test]
    fn delete_item_survives_cycles() {
        let mut tree = sample_tree();
        tree.insert(TreeItem::new("d").with_children(["a"]));

        let next = delete_item(&tree, "a");
        assert_eq!(next.len(), 2);
        assert_eq!(children(&next, ROOT_ID), vec!["b"]);
    }

    #[test]
    fn delete_root_is_ignored() {
        let tree = sample_tree();
        assert_eq!(delete_item(&tree, ROOT_ID), tree);
    }

    #[test]
    fn move_between_parents_and_back() {
        let tree = sample_tree();
        let source = MovePosition::at(ROOT_ID, 1);
        let destination = MovePosition::at("a", 0);

        let moved = move_item(&tree, &source, &destination).unwrap();
        assert_eq!(children(&moved, ROOT_ID), vec!["a"]);
        assert_eq!(children(&moved, "a"), vec!["b", "c"]);

        let back = move_item(&moved, &destination, &source).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn move_within_same_parent() {
        let mut tree = TreeModel::default();
        tree.insert(TreeItem::new(ROOT_ID).with_children(["a", "b", "c"]));
        for id in ["a", "b", "c"] {
            tree.insert(TreeItem::new(id));
        }

        let moved = move_item(
            &tree,
            &MovePosition::at(ROOT_ID, 0),
            &MovePosition::at(ROOT_ID, 2),
        )
        .unwrap();
        assert_eq!(children(&moved, ROOT_ID), vec!["b", "c", "a"]);
    }

    #[test]
    fn move_appends_or_clamps_destination() {
        let tree = sample_tree();

        let appended = move_item(
            &tree,
            &MovePosition::at("a", 0),
            &MovePosition::end_of(ROOT_ID),
        )
        .unwrap();
        assert_eq!(children(&appended, ROOT_ID), vec!["a", "b", "c"]);

        let clamped = move_item(
            &tree,
            &MovePosition::at("a", 0),
            &MovePosition::at(ROOT_ID, 99),
        )
        .unwrap();
        assert_eq!(children(&clamped, ROOT_ID), vec!["a", "b", "c"]);
    }

    #[test]
    fn cannot_move_into_descendant() {
        let tree = sample_tree();

        let err = move_item(
            &tree,
            &MovePosition::at(ROOT_ID, 0),
            &MovePosition::end_of("d"),
        )
        .unwrap_err();
        assert!(matches!(err, TreeError::InvalidMove(_)));

        let err = move_item(
            &tree,
            &MovePosition::at(ROOT_ID, 0),
            &MovePosition::end_of("a"),
        )
        .unwrap_err();
        assert!(matches!(err, TreeError::InvalidMove(_)));
    }

    #[test]
    fn move_rejects_bad_positions() {
        let tree = sample_tree();

        let err = move_item(
            &tree,
            &MovePosition::at(ROOT_ID, 5),
            &MovePosition::end_of("b"),
        )
        .unwrap_err();
        assert!(matches!(err, TreeError::InvalidMove(_)));

        let err = move_item(
            &tree,
            &MovePosition::at("zz", 0),
            &MovePosition::end_of("b"),
        )
        .unwrap_err();
        assert_eq!(err, TreeError::ParentNotFound("zz".into()));

        let err = move_item(
            &tree,
            &MovePosition::at(ROOT_ID, 0),
            &MovePosition::end_of("zz"),
        )
        .unwrap_err();
        assert_eq!(err, TreeError::ParentNotFound("zz".into()));
    }

    #[test]
    fn mutate_merges_data() {
        let mut tree = sample_tree();
        let mut meta = NoteMeta::new("b");
        meta.title = "Before".into();
        meta.updated_at = Some("t1".into());
        tree.insert(TreeItem::new("b").with_data(meta));

        let next = mutate_item(
            &tree,
            "b",
            ItemPatch {
                is_expanded: Some(true),
                children: None,
                data: Some(NotePatch {
                    title: Some("After".into()),
                    ..Default::default()
                }),
            },
        );

        let item = next.get("b").unwrap();
        assert_eq!(item.is_expanded, Some(true));
        let meta = item.data.as_ref().unwrap().meta();
        assert_eq!(meta.title, "After");
        assert_eq!(meta.updated_at.as_deref(), Some("t1"));
    }

    #[test]
    fn mutate_without_data_creates_it() {
        let next = mutate_item(&sample_tree(), "b", ItemPatch::data(Note::new("", "text")));
        let data = next.get("b").unwrap().data.as_ref().unwrap();
        assert_eq!(data.meta().id, "b");
        assert_eq!(data.content(), Some("text"));
    }

    #[test]
    fn mutate_unknown_id_is_noop() {
        let tree = sample_tree();
        assert_eq!(mutate_item(&tree, "ghost", ItemPatch::expanded(true)), tree);
    }

    #[test]
    fn flatten_is_preorder_and_excludes_start() {
        let tree = sample_tree();

        let ids: Vec<&str> = flatten_tree(&tree, None).map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "d", "b"]);

        let ids: Vec<&str> = flatten_tree(&tree, Some("a")).map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
    }

    #[test]
    fn flatten_terminates_on_cycles() {
        let mut tree = sample_tree();
        tree.insert(TreeItem::new("d").with_children(["a", "ghost"]));

        let ids: Vec<&str> = flatten_tree(&tree, Some("a")).map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
    }

    #[test]
    fn clean_tree_strips_bodies() {
        let mut tree = sample_tree();
        tree.insert(TreeItem::new("b").with_data(Note::new("b", "secret")));

        let cleaned = clean_tree_model(&tree);
        let b = cleaned.get("b").unwrap();
        assert_eq!(b.is_expanded, Some(false));
        assert!(!b.is_loaded());
        assert_eq!(b.data.as_ref().unwrap().meta().id, "b");
    }
}
