//! Hierarchical note tree.
//!
//! A tree is an arena of [`TreeItem`]s keyed by id with a single root. All
//! operations here are pure: they take a snapshot and return a new one, so the
//! caller decides which snapshot is current.
//!
//! - [`model`]: tree, item and note types with their wire format
//! - [`ops`]: add/remove/move/mutate/restore/delete, flatten, cleaning
//! - [`repair`]: dropping invalid child references
//! - [`hierarchy`]: nested view for rendering
//! - [`links`]: `/<id>` links between notes

pub mod error;
pub mod hierarchy;
pub mod links;
pub mod model;
pub mod ops;
pub mod repair;

pub use error::{Result, TreeError};
pub use hierarchy::{HierarchyNode, make_hierarchy, make_hierarchy_from};
pub use links::{NoteLink, extract_link_ids, is_note_id, parse_note_links};
pub use model::{
    EditorSize, ItemData, ItemPatch, Note, NoteDeleted, NoteMeta, NotePatch, NotePinned,
    NoteShared, ROOT_ID, TreeItem, TreeModel,
};
pub use ops::{
    Flatten, MovePosition, add_item, clean_tree_model, delete_item, descendant_closure,
    flatten_tree, move_item, mutate_item, remove_item, restore_item,
};
pub use repair::{DropReason, DroppedChild, RepairReport, repair_tree, repair_tree_with_report};
