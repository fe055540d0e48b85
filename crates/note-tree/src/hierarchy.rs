//! Nested view of the flat tree, built for rendering.
//!
//! Trees come from the server and the cache and can be arbitrarily deep, so
//! building, sizing and dropping a [`HierarchyNode`] all use explicit stacks.

use crate::model::{ItemData, TreeItem, TreeModel};
use serde::Serialize;
use std::collections::HashSet;

/// A tree item with its children resolved into nested nodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HierarchyNode {
    pub id: String,
    pub children: Vec<HierarchyNode>,
    #[serde(rename = "isExpanded", skip_serializing_if = "Option::is_none")]
    pub is_expanded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ItemData>,
}

impl HierarchyNode {
    pub fn title(&self) -> Option<&str> {
        self.data.as_ref().map(|data| data.meta().title.as_str())
    }

    /// Number of nodes in this subtree, including this one.
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            count += 1;
            pending.extend(&node.children);
        }
        count
    }
}

impl Drop for HierarchyNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

/// Nested view of the whole tree. `None` when the root item is missing.
pub fn make_hierarchy(tree: &TreeModel) -> Option<HierarchyNode> {
    make_hierarchy_from(tree, &tree.root_id)
}

/// An item whose children are being resolved.
struct Frame<'a> {
    item: &'a TreeItem,
    next_child: usize,
    children: Vec<HierarchyNode>,
}

impl<'a> Frame<'a> {
    fn new(item: &'a TreeItem) -> Self {
        Self {
            item,
            next_child: 0,
            children: Vec::with_capacity(item.children.len()),
        }
    }

    fn into_node(self) -> HierarchyNode {
        HierarchyNode {
            id: self.item.id.clone(),
            children: self.children,
            is_expanded: self.item.is_expanded,
            data: self.item.data.clone(),
        }
    }
}

/// Nested view below `id`. Dangling references are skipped and an item that
/// appears again on its own ancestor path is cut off.
pub fn make_hierarchy_from(tree: &TreeModel, id: &str) -> Option<HierarchyNode> {
    let top = tree.get(id)?;
    // ids on the path from `top` to the frame being filled
    let mut path: HashSet<&str> = HashSet::from([top.id.as_str()]);
    let mut stack = vec![Frame::new(top)];

    loop {
        let frame = stack.last_mut()?;
        let item = frame.item;
        if let Some(child_id) = item.children.get(frame.next_child) {
            frame.next_child += 1;
            if let Some(child) = tree.get(child_id) {
                if path.insert(child_id.as_str()) {
                    stack.push(Frame::new(child));
                }
            }
            continue;
        }

        let done = stack.pop()?;
        path.remove(done.item.id.as_str());
        let node = done.into_node();
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => return Some(node),
        }
    }
}
