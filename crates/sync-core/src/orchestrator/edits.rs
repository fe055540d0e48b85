//! Edits on the live tree.
//!
//! Edits apply locally first. Those the server tracks (moves, expand state,
//! note bodies, deletions) are then submitted; if that fails the local state
//! is kept, a `SyncFailed` event is emitted and `SyncError::SyncFailure` is
//! returned.

use super::{Result, SyncError, SyncOrchestrator};
use crate::events::{SyncEvent, now_millis};
use crate::id::gen_note_id;
use crate::remote::{MutateFields, RemoteError, RemoteNoteService, RemoteTreeService, TreeAction};
use crate::store::KeyValueStore;
use chrono::{SecondsFormat, Utc};
use futures::future::join_all;
use note_tree::{
    ItemData, ItemPatch, MovePosition, Note, NoteDeleted, NoteMeta, NotePatch, TreeModel,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Current time the way the server writes `updated_at`.
pub(crate) fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn deleted_patch(flag: NoteDeleted) -> NotePatch {
    NotePatch {
        deleted: Some(flag),
        ..Default::default()
    }
}

/// Writes `flag` to `id` and everything below it. Returns the new tree and the
/// ids it touched.
fn flag_subtree(tree: &TreeModel, id: &str, flag: NoteDeleted) -> (TreeModel, Vec<String>) {
    let ids: Vec<String> = std::iter::once(id.to_string())
        .chain(note_tree::flatten_tree(tree, Some(id)).map(|item| item.id.clone()))
        .filter(|id| tree.contains(id))
        .collect();
    let patch = ItemPatch::data(deleted_patch(flag));
    let next = ids.iter().fold(tree.clone(), |next, id| {
        note_tree::mutate_item(&next, id, patch.clone())
    });
    (next, ids)
}

impl<S, R> SyncOrchestrator<S, R>
where
    S: KeyValueStore,
    R: RemoteTreeService + RemoteNoteService,
{
    fn sync_failed(
        &self,
        operation: &'static str,
        id: Option<&str>,
        source: RemoteError,
    ) -> SyncError {
        tracing::error!(
            "Failed to sync {} {} to server: {}",
            operation,
            id.unwrap_or("-"),
            source
        );
        self.events.emit(SyncEvent::SyncFailed {
            operation: operation.to_string(),
            id: id.map(str::to_string),
            error: source.to_string(),
            timestamp: now_millis(),
        });
        SyncError::SyncFailure { operation, source }
    }

    /// Links `note` under its `pid` (the root when unset) with its data.
    pub async fn add_item(&self, note: Note) -> Result<Arc<TreeModel>> {
        self.ensure_ready()?;
        let id = note.meta.id.clone();
        let tree = self.apply(|tree| {
            let parent = note.meta.pid.as_deref().unwrap_or(&tree.root_id);
            let next = note_tree::add_item(tree, &id, parent)?;
            Ok(note_tree::mutate_item(&next, &id, ItemPatch::data(note.clone())))
        })?;
        self.persist().await;
        Ok(tree)
    }

    /// Detaches `id` and marks it and everything below it deleted.
    pub async fn remove_item(&self, id: &str) -> Result<Arc<TreeModel>> {
        self.ensure_ready()?;
        let mut flagged = Vec::new();
        let tree = self.apply(|tree| {
            let next = note_tree::remove_item(tree, id);
            let (next, ids) = flag_subtree(&next, id, NoteDeleted::Deleted);
            flagged = ids;
            Ok(next)
        })?;
        self.flag_cached(&flagged, NoteDeleted::Deleted).await;
        self.persist().await;
        Ok(tree)
    }

    /// Re-links `id` under `parent_id` and marks its subtree normal again.
    pub async fn restore_item(&self, id: &str, parent_id: &str) -> Result<Arc<TreeModel>> {
        self.ensure_ready()?;
        let mut flagged = Vec::new();
        let tree = self.apply(|tree| {
            let next = note_tree::restore_item(tree, id, parent_id)?;
            let (next, ids) = flag_subtree(&next, id, NoteDeleted::Normal);
            flagged = ids;
            Ok(next)
        })?;
        self.flag_cached(&flagged, NoteDeleted::Normal).await;
        self.persist().await;
        Ok(tree)
    }

    /// Mirrors a deleted flag into the note cache. Entries that fail to update
    /// are logged and skipped.
    async fn flag_cached(&self, ids: &[String], flag: NoteDeleted) {
        let patch = deleted_patch(flag);
        for id in ids {
            if let Err(e) = self.notes.mutate_item(id, patch.clone()).await {
                tracing::warn!("Failed to update cached note {}: {}", id, e);
            }
        }
    }

    /// Physically deletes `id` and its subtree, locally only.
    pub async fn delete_item(&self, id: &str) -> Result<Arc<TreeModel>> {
        self.ensure_ready()?;
        let closure = note_tree::descendant_closure(&self.tree(), id);
        let tree = self.apply(|tree| Ok(note_tree::delete_item(tree, id)))?;
        for id in closure.iter().filter(|id| !tree.contains(id)) {
            self.notes.remove_item(id).await?;
        }
        self.persist().await;
        Ok(tree)
    }

    pub async fn move_item(
        &self,
        source: &MovePosition,
        destination: &MovePosition,
    ) -> Result<Arc<TreeModel>> {
        self.ensure_ready()?;
        let tree = self.apply(|tree| note_tree::move_item(tree, source, destination))?;
        self.persist().await;

        let action = TreeAction::Move {
            source: source.clone(),
            destination: destination.clone(),
        };
        self.remote
            .submit_tree_action(&action)
            .await
            .map_err(|e| self.sync_failed("move", None, e))?;
        Ok(tree)
    }

    /// Merges `patch` into `id`. Only expand state and children are sent to
    /// the server; nothing is sent when the patch has neither.
    pub async fn mutate_item(&self, id: &str, patch: ItemPatch) -> Result<Arc<TreeModel>> {
        self.ensure_ready()?;
        if !self.tree().contains(id) {
            tracing::debug!("Ignoring mutation of unknown item {}", id);
            return Ok(self.tree());
        }

        let structural = ItemPatch {
            is_expanded: patch.is_expanded,
            children: patch.children.clone(),
            data: None,
        };
        let tree = self.apply(|tree| Ok(note_tree::mutate_item(tree, id, patch)))?;
        self.persist().await;

        if structural.has_structural_fields() {
            let action = TreeAction::Mutate(MutateFields {
                id: id.to_string(),
                patch: structural,
            });
            self.remote
                .submit_tree_action(&action)
                .await
                .map_err(|e| self.sync_failed("mutate", Some(id), e))?;
        }
        Ok(tree)
    }

    /// Sets `is_expanded` on every id at once, then submits one mutation per
    /// id concurrently.
    pub async fn set_items_expand_state(
        &self,
        ids: &[String],
        expanded: bool,
    ) -> Result<Arc<TreeModel>> {
        self.ensure_ready()?;
        let tree = self.apply(|tree| {
            Ok(ids.iter().fold(tree.clone(), |next, id| {
                note_tree::mutate_item(&next, id, ItemPatch::expanded(expanded))
            }))
        })?;
        self.persist().await;

        let submissions = ids.iter().filter(|id| tree.contains(id)).map(|id| async move {
            let action = TreeAction::Mutate(MutateFields {
                id: id.clone(),
                patch: ItemPatch::expanded(expanded),
            });
            (id, self.remote.submit_tree_action(&action).await)
        });
        let mut first_failure = None;
        for (id, result) in join_all(submissions).await {
            if let Err(e) = result {
                let err = self.sync_failed("mutate", Some(id.as_str()), e);
                first_failure.get_or_insert(err);
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(tree),
        }
    }

    /// Ancestors of `note` following `pid`, nearest first, excluding the root.
    pub fn get_paths(&self, note: &NoteMeta) -> Vec<NoteMeta> {
        let tree = self.tree();
        let mut paths = Vec::new();
        let mut seen = HashSet::new();
        let mut pid = note.pid.clone();

        while let Some(parent_id) = pid {
            if parent_id == tree.root_id || !seen.insert(parent_id.clone()) {
                break;
            }
            let Some(data) = tree.get(&parent_id).and_then(|item| item.data.as_ref()) else {
                break;
            };
            let meta = data.meta().clone();
            pid = meta.pid.clone();
            paths.push(meta);
        }
        paths
    }

    /// Expands every ancestor of `note` so it becomes visible.
    pub async fn show_item(&self, note: &NoteMeta) -> Result<Arc<TreeModel>> {
        let ids: Vec<String> = self.get_paths(note).into_iter().map(|meta| meta.id).collect();
        self.set_items_expand_state(&ids, true).await
    }

    /// True when every ancestor of `note` is expanded.
    pub fn check_item_is_shown(&self, note: &NoteMeta) -> bool {
        let tree = self.tree();
        self.get_paths(note).iter().all(|meta| {
            tree.get(&meta.id)
                .and_then(|item| item.is_expanded)
                .unwrap_or(false)
        })
    }

    pub async fn collapse_all_items(&self) -> Result<Arc<TreeModel>> {
        let expanded: Vec<String> = self
            .tree()
            .items
            .values()
            .filter(|item| item.is_expanded == Some(true))
            .map(|item| item.id.clone())
            .collect();
        self.set_items_expand_state(&expanded, false).await
    }

    /// Derived tree whose root lists the pinned, non-deleted notes. The live
    /// tree is not changed.
    pub fn pinned_tree(&self) -> TreeModel {
        let mut tree = TreeModel::clone(&self.tree());
        let pinned: Vec<String> = tree
            .items
            .values()
            .filter(|item| {
                item.data
                    .as_ref()
                    .map(ItemData::meta)
                    .is_some_and(|meta| meta.is_pinned() && !meta.is_deleted())
            })
            .map(|item| item.id.clone())
            .collect();
        let root_id = tree.root_id.clone();
        if let Some(root) = tree.items.get_mut(&root_id) {
            root.children = pinned;
        }
        tree
    }

    /// A fresh note id not used in the current tree.
    pub fn gen_new_id(&self) -> String {
        let tree = self.tree();
        loop {
            let id = gen_note_id();
            if !tree.contains(&id) {
                return id;
            }
        }
    }

    /// The note as last edited locally: the cached draft, else the loaded body
    /// in the tree.
    async fn local_note(&self, id: &str) -> Result<Note> {
        if let Some(note) = self.notes.get_item(id).await? {
            return Ok(note);
        }
        self.tree()
            .get(id)
            .and_then(|item| item.data.as_ref())
            .map(|data| match data {
                ItemData::Full(note) => note.clone(),
                ItemData::Metadata(meta) => Note {
                    meta: meta.clone(),
                    content: String::new(),
                },
            })
            .ok_or_else(|| SyncError::ItemNotFound(id.to_string()))
    }

    /// Stores an edit in the note cache with a fresh `updated_at`. Nothing is
    /// sent to the server.
    pub async fn save_draft(&self, id: &str, patch: NotePatch) -> Result<Note> {
        let draft = self.local_note(id).await?.merged(NotePatch {
            updated_at: Some(timestamp_now()),
            ..patch
        });
        let entry = self.notes.set_item(id, draft).await?;
        tracing::debug!("Saved draft: {}", id);
        Ok(entry.note)
    }

    /// Sends the local version of `id` to the server and stores the answer.
    ///
    /// New notes are created (the server may pick another id) and linked into
    /// the tree; existing ones are updated in place.
    pub async fn push_note(&self, id: &str, is_new: bool) -> Result<Note> {
        self.ensure_ready()?;
        let draft = self.local_note(id).await?;
        let body = NotePatch::from(draft.clone());

        let answer = if is_new {
            self.remote
                .create_note(&body)
                .await
                .map_err(|e| self.sync_failed("create", Some(id), e))?
        } else {
            self.remote
                .update_note(id, &body)
                .await
                .map_err(|e| self.sync_failed("update", Some(id), e))?
        };
        // the answer may be partial; the draft fills in what it leaves out
        let saved = draft.merged(answer);

        let saved_id = if saved.meta.id.is_empty() {
            id.to_string()
        } else {
            saved.meta.id.clone()
        };
        self.notes.set_item(&saved_id, saved.clone()).await?;

        if saved_id != id {
            tracing::debug!("Server renamed note {} to {}", id, saved_id);
            self.notes.remove_item(id).await?;
            self.apply(|tree| Ok(note_tree::delete_item(tree, id)))?;
        }

        if is_new {
            self.apply(|tree| {
                let parent = saved.meta.pid.as_deref().unwrap_or(&tree.root_id);
                let next = note_tree::add_item(tree, &saved_id, parent)?;
                Ok(note_tree::mutate_item(&next, &saved_id, ItemPatch::data(saved.clone())))
            })?;
        } else {
            self.apply(|tree| {
                Ok(note_tree::mutate_item(tree, &saved_id, ItemPatch::data(saved.clone())))
            })?;
        }
        self.persist().await;
        Ok(saved)
    }

    /// Deletes `id` on the server, then detaches it locally and drops its
    /// cache entry.
    pub async fn delete_note(&self, id: &str) -> Result<Arc<TreeModel>> {
        self.ensure_ready()?;
        self.remote
            .delete_note(id)
            .await
            .map_err(|e| self.sync_failed("delete", Some(id), e))?;

        let tree = self.apply(|tree| Ok(note_tree::remove_item(tree, id)))?;
        self.notes.remove_item(id).await?;
        self.persist().await;
        Ok(tree)
    }

    /// Cached notes that link to `id`.
    pub async fn backlinks(&self, id: &str) -> Result<Vec<NoteMeta>> {
        Ok(self.notes.backlinks(id).await?)
    }
}
