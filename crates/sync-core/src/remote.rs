//! Traits for the notes server.
//!
//! The server is the store of record. The client reads the tree and note
//! bodies from it and submits structural edits as [`TreeAction`]s.

use async_trait::async_trait;
use note_tree::{ItemPatch, MovePosition, NotePatch, TreeModel};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Fields of a `mutate` action: the item id plus the changed item fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutateFields {
    pub id: String,
    #[serde(flatten)]
    pub patch: ItemPatch,
}

/// A structural edit as sent to `POST /api/tree`.
///
/// Serializes as `{"action": "move", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "lowercase")]
pub enum TreeAction {
    Move {
        source: MovePosition,
        destination: MovePosition,
    },
    Mutate(MutateFields),
}

/// Tree endpoints of the notes server.
#[async_trait]
pub trait RemoteTreeService: Send + Sync {
    /// Fetch the authoritative tree (metadata only)
    async fn fetch_tree(&self) -> Result<TreeModel>;

    /// Apply a structural edit on the server
    async fn submit_tree_action(&self, action: &TreeAction) -> Result<()>;
}

/// Note endpoints of the notes server.
///
/// Notes come back as [`NotePatch`]es: the server may leave out any field,
/// and an absent field must not overwrite what the client already knows.
#[async_trait]
pub trait RemoteNoteService: Send + Sync {
    /// Fetch one note with its body
    async fn fetch_note(&self, id: &str) -> Result<NotePatch>;

    /// Create a note. The server may assign a different id.
    async fn create_note(&self, note: &NotePatch) -> Result<NotePatch>;

    /// Update a note, returning the stored fields
    async fn update_note(&self, id: &str, note: &NotePatch) -> Result<NotePatch>;

    async fn delete_note(&self, id: &str) -> Result<()>;
}

#[async_trait]
impl<T: RemoteTreeService + ?Sized> RemoteTreeService for Arc<T> {
    async fn fetch_tree(&self) -> Result<TreeModel> {
        (**self).fetch_tree().await
    }

    async fn submit_tree_action(&self, action: &TreeAction) -> Result<()> {
        (**self).submit_tree_action(action).await
    }
}

#[async_trait]
impl<T: RemoteNoteService + ?Sized> RemoteNoteService for Arc<T> {
    async fn fetch_note(&self, id: &str) -> Result<NotePatch> {
        (**self).fetch_note(id).await
    }

    async fn create_note(&self, note: &NotePatch) -> Result<NotePatch> {
        (**self).create_note(note).await
    }

    async fn update_note(&self, id: &str, note: &NotePatch) -> Result<NotePatch> {
        (**self).update_note(id, note).await
    }

    async fn delete_note(&self, id: &str) -> Result<()> {
        (**self).delete_note(id).await
    }
}
