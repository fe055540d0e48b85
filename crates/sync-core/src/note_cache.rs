//! Per-note cache of the last known full body.
//!
//! Each entry stores the note under `notes/<id>` together with the ids of the
//! notes it links to. `updated_at` on the entry is the only freshness signal:
//! an entry is usable exactly when its timestamp equals the one in the tree.

use crate::store::{self, KeyValueStore, Result, StoreError};
use note_tree::{Note, NoteMeta, NotePatch, TreeItem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::ControlFlow;

/// Key prefix for note entries.
pub const NOTE_PREFIX: &str = "notes/";

fn note_key(id: &str) -> String {
    format!("{}{}", NOTE_PREFIX, id)
}

/// A cached note and its outgoing links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedNote {
    #[serde(flatten)]
    pub note: Note,
    #[serde(rename = "linkIds", default)]
    pub link_ids: Vec<String>,
}

impl CachedNote {
    pub fn new(note: Note) -> Self {
        let link_ids = note_tree::extract_link_ids(&note.content)
            .into_iter()
            .filter(|id| *id != note.meta.id)
            .collect();
        Self { note, link_ids }
    }

    pub fn links_to(&self, id: &str) -> bool {
        self.link_ids.iter().any(|link| link == id)
    }
}

/// Whether a cached entry can stand in for a tree item stamped `expected`.
///
/// An item without a timestamp never matches, so it is always fetched.
pub fn is_fresh(cached: &Note, expected: Option<&str>) -> bool {
    expected.is_some_and(|stamp| cached.updated_at() == Some(stamp))
}

pub struct NoteCache<S> {
    store: S,
}

impl<S: KeyValueStore> NoteCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The cached entry for `id`. An undecodable entry is dropped and reported
    /// as a miss.
    pub async fn get_entry(&self, id: &str) -> Result<Option<CachedNote>> {
        let key = note_key(id);
        match store::get_json::<_, CachedNote>(&self.store, &key).await {
            Err(StoreError::Serialization { source, .. }) => {
                tracing::warn!("Dropping undecodable cache entry {}: {}", key, source);
                self.store.delete(&key).await?;
                Ok(None)
            }
            other => other,
        }
    }

    pub async fn get_item(&self, id: &str) -> Result<Option<Note>> {
        Ok(self.get_entry(id).await?.map(|entry| entry.note))
    }

    /// Stores `note` under `id`, recomputing its links.
    pub async fn set_item(&self, id: &str, note: Note) -> Result<CachedNote> {
        let entry = CachedNote::new(note);
        store::set_json(&self.store, &note_key(id), &entry).await?;
        Ok(entry)
    }

    /// Merges `patch` into the cached note. Returns `None`, writing nothing,
    /// when `id` is not cached.
    pub async fn mutate_item(&self, id: &str, patch: NotePatch) -> Result<Option<Note>> {
        let Some(entry) = self.get_entry(id).await? else {
            return Ok(None);
        };
        let merged = entry.note.merged(patch);
        Ok(Some(self.set_item(id, merged).await?.note))
    }

    pub async fn remove_item(&self, id: &str) -> Result<()> {
        self.store.delete(&note_key(id)).await
    }

    /// Ids of every cached note, sorted.
    pub async fn ids(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .keys(NOTE_PREFIX)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(NOTE_PREFIX).map(str::to_string))
            .collect())
    }

    /// Visits cached entries in id order until the visitor breaks.
    ///
    /// Entries are read one at a time. Returns how many were visited.
    pub async fn iterate<F>(&self, mut visitor: F) -> Result<usize>
    where
        F: FnMut(&CachedNote) -> ControlFlow<()>,
    {
        let mut visited = 0;
        for id in self.ids().await? {
            let Some(entry) = self.get_entry(&id).await? else {
                continue;
            };
            visited += 1;
            if visitor(&entry).is_break() {
                break;
            }
        }
        Ok(visited)
    }

    /// Evicts entries whose id is not in `items`. Returns the evicted ids.
    pub async fn check_items(&self, items: &BTreeMap<String, TreeItem>) -> Result<Vec<String>> {
        let mut evicted = Vec::new();
        for id in self.ids().await? {
            if !items.contains_key(&id) {
                self.remove_item(&id).await?;
                evicted.push(id);
            }
        }
        if !evicted.is_empty() {
            tracing::debug!("Evicted {} cached notes no longer in the tree", evicted.len());
        }
        Ok(evicted)
    }

    /// Cached notes that link to `id`.
    pub async fn backlinks(&self, id: &str) -> Result<Vec<NoteMeta>> {
        let mut linking = Vec::new();
        self.iterate(|entry| {
            if entry.note.meta.id != id && entry.links_to(id) {
                linking.push(entry.note.meta.clone());
            }
            ControlFlow::Continue(())
        })
        .await?;
        Ok(linking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use note_tree::{NoteDeleted, TreeModel};
    use std::sync::Arc;

    fn note(id: &str, content: &str, updated_at: &str) -> Note {
        let mut note = Note::new(id, content);
        note.meta.updated_at = Some(updated_at.into());
        note
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = NoteCache::new(InMemoryStore::new());
        assert!(cache.get_item("a").await.unwrap().is_none());

        cache.set_item("a", note("a", "body", "t1")).await.unwrap();
        let cached = cache.get_item("a").await.unwrap().unwrap();
        assert_eq!(cached.content, "body");
        assert_eq!(cached.updated_at(), Some("t1"));
    }

    #[tokio::test]
    async fn test_links_are_recorded() {
        let cache = NoteCache::new(InMemoryStore::new());
        let entry = cache
            .set_item("a", note("a", "[b](/b) [self](/a) [c](/c)", "t1"))
            .await
            .unwrap();
        assert_eq!(entry.link_ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_mutate_merges_or_skips() {
        let cache = NoteCache::new(InMemoryStore::new());
        let patch = NotePatch {
            deleted: Some(NoteDeleted::Deleted),
            ..Default::default()
        };

        assert!(cache.mutate_item("a", patch.clone()).await.unwrap().is_none());
        assert!(cache.get_item("a").await.unwrap().is_none());

        cache.set_item("a", note("a", "body", "t1")).await.unwrap();
        let merged = cache.mutate_item("a", patch).await.unwrap().unwrap();
        assert!(merged.meta.is_deleted());
        assert_eq!(merged.content, "body");
    }

    #[tokio::test]
    async fn test_iterate_can_stop_early() {
        let cache = NoteCache::new(InMemoryStore::new());
        for id in ["a", "b", "c"] {
            cache.set_item(id, note(id, "", "t")).await.unwrap();
        }

        let mut seen = Vec::new();
        let visited = cache
            .iterate(|entry| {
                seen.push(entry.note.meta.id.clone());
                if seen.len() == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await
            .unwrap();

        assert_eq!(visited, 2);
        assert_eq!(seen, vec!["a", "b"]);

        // a fresh call starts over
        assert_eq!(cache.iterate(|_| ControlFlow::Continue(())).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_check_items_evicts_unknown_ids() {
        let store = Arc::new(InMemoryStore::new());
        let cache = NoteCache::new(Arc::clone(&store));
        for id in ["a", "gone"] {
            cache.set_item(id, note(id, "", "t")).await.unwrap();
        }
        let mut tree = TreeModel::default();
        tree.insert(note_tree::TreeItem::new("a"));

        let evicted = cache.check_items(&tree.items).await.unwrap();
        assert_eq!(evicted, vec!["gone"]);
        assert!(!store.contains("notes/gone"));
        assert!(store.contains("notes/a"));
    }

    #[tokio::test]
    async fn test_backlinks() {
        let cache = NoteCache::new(InMemoryStore::new());
        cache.set_item("a", note("a", "see [t](/t)", "1")).await.unwrap();
        cache.set_item("b", note("b", "nothing", "1")).await.unwrap();
        cache.set_item("c", note("c", "[t](/t) [a](/a)", "1")).await.unwrap();

        let ids: Vec<String> = cache
            .backlinks("t")
            .await
            .unwrap()
            .into_iter()
            .map(|meta| meta.id)
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let store = Arc::new(InMemoryStore::new());
        store.set("notes/x", b"garbage").await.unwrap();
        let cache = NoteCache::new(Arc::clone(&store));

        assert!(cache.get_item("x").await.unwrap().is_none());
        assert!(!store.contains("notes/x"));
    }

    #[test]
    fn test_freshness_is_string_equality() {
        let cached = note("a", "", "2024-01-01T00:00:00Z");
        assert!(is_fresh(&cached, Some("2024-01-01T00:00:00Z")));

        // same instant, different spelling: still a miss
        assert!(!is_fresh(&cached, Some("2024-01-01T00:00:00.000Z")));
    }

    #[test]
    fn test_untimestamped_item_is_never_fresh() {
        let mut cached = note("a", "old body", "2024-01-01T00:00:00Z");
        assert!(!is_fresh(&cached, None));

        cached.meta.updated_at = None;
        assert!(!is_fresh(&cached, None));
    }
}
