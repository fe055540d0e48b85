//! Durable copy of the tree.
//!
//! The tree lives as one JSON blob under [`TREE_KEY`]. Every read and every
//! write goes through repair, so nothing downstream ever sees a corrupt tree.
//! Structural edits are read-modify-write: last writer wins.

use crate::store::{self, KeyValueStore, StoreError};
use note_tree::{ItemPatch, MovePosition, RepairReport, TreeError, TreeModel};
use thiserror::Error;

/// Key of the tree blob.
pub const TREE_KEY: &str = "tree";

#[derive(Debug, Error)]
pub enum TreeStoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

pub type Result<T> = std::result::Result<T, TreeStoreError>;

/// Logs what repair changed, if anything.
pub(crate) fn log_repair(report: &RepairReport, origin: &str) {
    if report.is_clean() {
        return;
    }
    if report.root_recreated {
        tracing::warn!("Recreated missing root in {} tree", origin);
    }
    tracing::warn!(
        "Repaired {} tree: dropped {} child references",
        origin,
        report.dropped.len()
    );
    for dropped in &report.dropped {
        tracing::debug!(
            "Dropped child {:?} of {:?} ({})",
            dropped.child,
            dropped.parent,
            dropped.reason
        );
    }
}

fn repaired(tree: TreeModel, origin: &str) -> TreeModel {
    let (tree, report) = note_tree::repair_tree_with_report(tree);
    log_repair(&report, origin);
    tree
}

pub struct TreeStore<S> {
    store: S,
}

impl<S: KeyValueStore> TreeStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The stored tree, repaired, or `None` when nothing usable is stored.
    ///
    /// An undecodable blob is treated as absent; the cache is never the
    /// source of truth.
    pub async fn load(&self) -> Result<Option<TreeModel>> {
        match store::get_json::<_, TreeModel>(&self.store, TREE_KEY).await {
            Ok(Some(tree)) => Ok(Some(repaired(tree, "cached"))),
            Ok(None) => Ok(None),
            Err(StoreError::Serialization { source, .. }) => {
                tracing::warn!("Ignoring undecodable cached tree: {}", source);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The stored tree, initializing it with an empty root when absent.
    pub async fn get(&self) -> Result<TreeModel> {
        match self.load().await? {
            Some(tree) => Ok(tree),
            None => {
                tracing::debug!("No cached tree, writing default");
                self.set(TreeModel::default()).await
            }
        }
    }

    /// Repairs and persists `tree`, returning what was written.
    pub async fn set(&self, tree: TreeModel) -> Result<TreeModel> {
        let tree = repaired(tree, "outgoing");
        store::set_json(&self.store, TREE_KEY, &tree).await?;
        Ok(tree)
    }

    pub async fn add_item(&self, id: &str, parent_id: &str) -> Result<TreeModel> {
        let tree = self.get().await?;
        self.set(note_tree::add_item(&tree, id, parent_id)?).await
    }

    pub async fn remove_item(&self, id: &str) -> Result<TreeModel> {
        let tree = self.get().await?;
        self.set(note_tree::remove_item(&tree, id)).await
    }

    pub async fn move_item(
        &self,
        source: &MovePosition,
        destination: &MovePosition,
    ) -> Result<TreeModel> {
        let tree = self.get().await?;
        self.set(note_tree::move_item(&tree, source, destination)?)
            .await
    }

    pub async fn mutate_item(&self, id: &str, patch: ItemPatch) -> Result<TreeModel> {
        let tree = self.get().await?;
        self.set(note_tree::mutate_item(&tree, id, patch)).await
    }

    pub async fn restore_item(&self, id: &str, parent_id: &str) -> Result<TreeModel> {
        let tree = self.get().await?;
        self.set(note_tree::restore_item(&tree, id, parent_id)?)
            .await
    }

    pub async fn delete_item(&self, id: &str) -> Result<TreeModel> {
        let tree = self.get().await?;
        self.set(note_tree::delete_item(&tree, id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use note_tree::ROOT_ID;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_initializes_default_tree() {
        let store = Arc::new(InMemoryStore::new());
        let trees = TreeStore::new(Arc::clone(&store));

        assert!(trees.load().await.unwrap().is_none());
        let tree = trees.get().await.unwrap();

        assert_eq!(tree, TreeModel::default());
        assert!(store.contains(TREE_KEY));
    }

    #[tokio::test]
    async fn test_set_repairs_before_persisting() {
        let trees = TreeStore::new(InMemoryStore::new());
        let mut tree = TreeModel::default();
        if let Some(root) = tree.items.get_mut(ROOT_ID) {
            root.children = vec!["ghost".into(), ROOT_ID.into()];
        }

        let written = trees.set(tree).await.unwrap();
        assert!(written.root().unwrap().children.is_empty());
        assert_eq!(trees.get().await.unwrap(), written);
    }

    #[tokio::test]
    async fn test_load_repairs_stored_tree() {
        let store = InMemoryStore::new();
        store
            .set(
                TREE_KEY,
                br#"{"rootId":"root","items":{"root":{"id":"root","children":["a",null,"a"]},"a":{"id":"a"}}}"#,
            )
            .await
            .unwrap();
        let trees = TreeStore::new(store);

        let tree = trees.load().await.unwrap().unwrap();
        assert_eq!(tree.root().unwrap().children, vec!["a"]);
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_replaced() {
        let store = InMemoryStore::new();
        store.set(TREE_KEY, b"{oops").await.unwrap();
        let trees = TreeStore::new(store);

        assert!(trees.load().await.unwrap().is_none());
        assert_eq!(trees.get().await.unwrap(), TreeModel::default());
    }

    #[tokio::test]
    async fn test_read_modify_write_operations() {
        let trees = TreeStore::new(InMemoryStore::new());

        trees.add_item("a", ROOT_ID).await.unwrap();
        trees.add_item("b", ROOT_ID).await.unwrap();
        trees.add_item("c", "a").await.unwrap();

        let tree = trees
            .move_item(&MovePosition::at(ROOT_ID, 1), &MovePosition::end_of("a"))
            .await
            .unwrap();
        assert_eq!(tree.get("a").unwrap().children, vec!["c", "b"]);

        trees.mutate_item("a", ItemPatch::expanded(true)).await.unwrap();
        trees.remove_item("a").await.unwrap();
        let tree = trees.restore_item("a", ROOT_ID).await.unwrap();
        assert_eq!(tree.get("a").unwrap().is_expanded, Some(true));

        let tree = trees.delete_item("a").await.unwrap();
        assert_eq!(tree, TreeModel::default());
    }

    #[tokio::test]
    async fn test_structural_error_leaves_store_untouched() {
        let trees = TreeStore::new(InMemoryStore::new());
        trees.add_item("a", ROOT_ID).await.unwrap();

        let err = trees.add_item("b", "missing").await.unwrap_err();
        assert!(matches!(
            err,
            TreeStoreError::Tree(TreeError::ParentNotFound(_))
        ));
        assert!(!trees.get().await.unwrap().contains("b"));
    }
}
