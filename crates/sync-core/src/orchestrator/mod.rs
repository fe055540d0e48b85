//! Owner of the live tree.
//!
//! Startup runs in two phases. The cached tree is shown first, with every
//! body whose cache entry is still fresh. Meanwhile the authoritative tree is
//! fetched; its most recently updated notes are loaded right away (from the
//! cache when fresh, otherwise from the server) and everything else keeps
//! metadata only until [`SyncOrchestrator::load_note_on_demand`] asks for it.
//!
//! The live tree is an `Arc<TreeModel>` behind a lock that is only held to
//! swap snapshots, never across an `.await`.

mod edits;

use crate::config::SyncConfig;
use crate::events::{EventBus, NoteSource, SyncEvent, now_millis};
use crate::note_cache::{self, NoteCache};
use crate::remote::{RemoteError, RemoteNoteService, RemoteTreeService};
use crate::store::{KeyValueStore, StoreError};
use crate::tree_store::{self, TreeStore, TreeStoreError};
use chrono::{DateTime, FixedOffset};
use futures::future::join_all;
use note_tree::{ItemData, ItemPatch, Note, NoteMeta, NotePatch, TreeError, TreeItem, TreeModel};
use serde::Serialize;
use std::cmp::Reverse;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use web_time::Instant;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Not ready (state: {0})")]
    NotReady(SyncState),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Failed to sync {operation} to server: {source}")]
    SyncFailure {
        operation: &'static str,
        #[source]
        source: RemoteError,
    },

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl From<TreeStoreError> for SyncError {
    fn from(err: TreeStoreError) -> Self {
        match err {
            TreeStoreError::Store(e) => SyncError::Store(e),
            TreeStoreError::Tree(e) => SyncError::Tree(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Lifecycle of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    Uninitialized,
    LoadingFromCache,
    LoadingFromRemote,
    Merging,
    Ready,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Uninitialized => "uninitialized",
            SyncState::LoadingFromCache => "loading from cache",
            SyncState::LoadingFromRemote => "loading from remote",
            SyncState::Merging => "merging",
            SyncState::Ready => "ready",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchFailure {
    pub id: String,
    pub error: String,
}

/// Summary of [`SyncOrchestrator::init`].
#[derive(Debug, Clone, Default)]
pub struct InitReport {
    /// Items in the cached tree shown before the server answered.
    pub provisional_items: Option<usize>,
    pub total_items: usize,
    /// Ids picked for eager loading, most recent first.
    pub priority: Vec<String>,
    pub deferred: usize,
    /// Bodies taken from the note cache.
    pub from_cache: usize,
    /// Bodies fetched from the server.
    pub fetched: usize,
    pub failed: Vec<FetchFailure>,
    pub evicted: Vec<String>,
    pub elapsed: Duration,
}

impl InitReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Splits the non-root items into the `preload_count` most recently updated
/// ids and the rest.
///
/// Items without a parseable RFC 3339 `updated_at` sort last; ties keep key
/// order.
pub fn partition_by_recency(
    tree: &TreeModel,
    preload_count: usize,
) -> (Vec<String>, Vec<String>) {
    let mut ranked: Vec<(&str, Option<DateTime<FixedOffset>>)> = tree
        .items
        .values()
        .filter(|item| item.id != tree.root_id)
        .map(|item| {
            let updated = item
                .updated_at()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok());
            (item.id.as_str(), updated)
        })
        .collect();
    ranked.sort_by_key(|(_, updated)| Reverse(*updated));

    let split = preload_count.min(ranked.len());
    let deferred = ranked.split_off(split);
    (
        ranked.into_iter().map(|(id, _)| id.to_string()).collect(),
        deferred.into_iter().map(|(id, _)| id.to_string()).collect(),
    )
}

/// Overlays `patch` on an item's data, keeping the item's id. Fields the
/// patch leaves out keep their current value.
fn merge_body(item: &mut TreeItem, patch: NotePatch) {
    let current = item
        .data
        .take()
        .unwrap_or_else(|| ItemData::Metadata(NoteMeta::new(item.id.clone())));
    let mut merged = current.merged(patch);
    merged.meta_mut().id = item.id.clone();
    item.data = Some(merged);
}

/// The full note `patch` describes when laid over `base`. A missing body is
/// treated as empty.
fn overlay_note(id: &str, base: Option<ItemData>, mut patch: NotePatch) -> Note {
    patch.id = Some(id.to_string());
    patch.content.get_or_insert_with(String::new);
    let base = base.unwrap_or_else(|| ItemData::Metadata(NoteMeta::new(id)));
    match base.merged(patch) {
        ItemData::Full(note) => note,
        ItemData::Metadata(meta) => Note {
            meta,
            content: String::new(),
        },
    }
}

/// Carries bodies from `live` over to `next` where `next` only has metadata
/// and both sides carry the same `updated_at`.
fn adopt_loaded_bodies(next: &mut TreeModel, live: &TreeModel) {
    for (id, item) in next.items.iter_mut() {
        if item.is_loaded() {
            continue;
        }
        let Some(ItemData::Full(loaded)) = live.get(id).and_then(|live| live.data.as_ref()) else {
            continue;
        };
        if item.updated_at().is_some() && loaded.updated_at() == item.updated_at() {
            merge_body(
                item,
                NotePatch {
                    content: Some(loaded.content.clone()),
                    ..Default::default()
                },
            );
        }
    }
}

pub struct SyncOrchestrator<S, R> {
    trees: TreeStore<Arc<S>>,
    notes: NoteCache<Arc<S>>,
    remote: R,
    config: SyncConfig,
    events: Arc<EventBus>,
    tree: RwLock<Arc<TreeModel>>,
    state: RwLock<SyncState>,
}

impl<S, R> SyncOrchestrator<S, R>
where
    S: KeyValueStore,
    R: RemoteTreeService + RemoteNoteService,
{
    pub fn new(store: Arc<S>, remote: R, config: SyncConfig) -> Self {
        Self {
            trees: TreeStore::new(Arc::clone(&store)),
            notes: NoteCache::new(store),
            remote,
            config,
            events: Arc::new(EventBus::new()),
            tree: RwLock::new(Arc::new(TreeModel::default())),
            state: RwLock::new(SyncState::Uninitialized),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn note_cache(&self) -> &NoteCache<Arc<S>> {
        &self.notes
    }

    pub fn tree_store(&self) -> &TreeStore<Arc<S>> {
        &self.trees
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Current tree snapshot.
    pub fn tree(&self) -> Arc<TreeModel> {
        Arc::clone(&self.tree.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn state(&self) -> SyncState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
        tracing::debug!("Sync state: {}", state);
        self.events.emit(SyncEvent::StateChanged {
            state,
            timestamp: now_millis(),
        });
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            SyncState::Ready => Ok(()),
            state => Err(SyncError::NotReady(state)),
        }
    }

    /// Reads are allowed as soon as the provisional tree is up.
    fn ensure_tree_shown(&self) -> Result<()> {
        match self.state() {
            state @ (SyncState::Uninitialized | SyncState::LoadingFromCache) => {
                Err(SyncError::NotReady(state))
            }
            _ => Ok(()),
        }
    }

    fn publish_provisional(&self, tree: TreeModel) {
        let items = tree.len();
        *self.tree.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(tree);
        self.events.emit(SyncEvent::TreePublished {
            provisional: true,
            items,
            timestamp: now_millis(),
        });
    }

    /// Applies a pure edit to the current snapshot and swaps in the result.
    fn apply<F>(&self, edit: F) -> Result<Arc<TreeModel>>
    where
        F: FnOnce(&TreeModel) -> note_tree::Result<TreeModel>,
    {
        let next = {
            let mut current = self.tree.write().unwrap_or_else(|e| e.into_inner());
            let next = Arc::new(edit(&current)?);
            *current = Arc::clone(&next);
            next
        };
        self.events.emit(SyncEvent::TreePublished {
            provisional: false,
            items: next.len(),
            timestamp: now_millis(),
        });
        Ok(next)
    }

    /// Writes the current snapshot to the tree cache. Failures are logged;
    /// the live tree stays authoritative.
    async fn persist(&self) {
        let snapshot = self.tree();
        if let Err(e) = self.trees.set(TreeModel::clone(&snapshot)).await {
            tracing::warn!("Failed to persist tree cache: {}", e);
        }
    }

    /// Loads the tree: cache first, then the server.
    ///
    /// If the server tree can't be fetched the orchestrator still becomes
    /// ready, serving the cached tree (or an empty one), and the error is
    /// returned.
    pub async fn init(&self) -> Result<InitReport> {
        let started = Instant::now();
        tracing::info!(
            "Initializing note tree (preloading {} notes)",
            self.config.preload_count
        );
        self.set_state(SyncState::LoadingFromCache);

        let (provisional_items, fetched_tree) =
            futures::join!(self.show_cached_tree(), self.remote.fetch_tree());

        let remote_tree = match fetched_tree {
            Ok(tree) => tree,
            Err(e) => {
                tracing::error!("Failed to load tree from server: {}", e);
                self.set_state(SyncState::Ready);
                return Err(e.into());
            }
        };

        self.set_state(SyncState::Merging);
        let (mut tree, repair) = note_tree::repair_tree_with_report(remote_tree);
        tree_store::log_repair(&repair, "remote");

        let (priority, deferred) = partition_by_recency(&tree, self.config.preload_count);
        let mut report = InitReport {
            provisional_items,
            total_items: tree.len(),
            deferred: deferred.len(),
            ..Default::default()
        };

        let (hits, priority_misses) = self.merge_from_cache(&mut tree, &priority).await;
        report.from_cache += hits;
        let (hits, deferred_misses) = self.merge_from_cache(&mut tree, &deferred).await;
        report.from_cache += hits;
        tracing::debug!(
            "{} priority notes to fetch, {} deferred until opened",
            priority_misses.len(),
            deferred_misses.len()
        );

        let fetches = priority_misses.iter().map(|id| {
            let base = tree.get(id).and_then(|item| item.data.clone());
            async move {
                let result = self.fetch_and_cache(id, base).await;
                (id, result)
            }
        });
        for (id, result) in join_all(fetches).await {
            match result {
                Ok((patch, _)) => {
                    if let Some(item) = tree.items.get_mut(id) {
                        merge_body(item, patch);
                    }
                    report.fetched += 1;
                }
                Err(e) => report.failed.push(FetchFailure {
                    id: id.clone(),
                    error: e.to_string(),
                }),
            }
        }
        report.priority = priority;

        // on-demand loads may have landed while the server tree was in flight
        let tree = self.apply(move |live| {
            let mut tree = tree;
            adopt_loaded_bodies(&mut tree, live);
            Ok(tree)
        })?;
        if let Err(e) = self.trees.set(TreeModel::clone(&tree)).await {
            tracing::warn!("Failed to persist tree cache: {}", e);
        }
        match self.notes.check_items(&tree.items).await {
            Ok(evicted) => {
                if !evicted.is_empty() {
                    self.events.emit(SyncEvent::CacheEvicted {
                        ids: evicted.clone(),
                        timestamp: now_millis(),
                    });
                }
                report.evicted = evicted;
            }
            Err(e) => tracing::warn!("Failed to prune note cache: {}", e),
        }

        self.set_state(SyncState::Ready);
        report.elapsed = started.elapsed();
        tracing::info!(
            "Note tree ready: {} items, {} from cache, {} fetched, {} failed in {:?}",
            report.total_items,
            report.from_cache,
            report.fetched,
            report.failed.len(),
            report.elapsed
        );
        Ok(report)
    }

    /// Publishes the cached tree with its fresh bodies. Returns its size, or
    /// `None` when there is no usable cached tree.
    async fn show_cached_tree(&self) -> Option<usize> {
        let cached = match self.trees.load().await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!("Failed to read cached tree: {}", e);
                None
            }
        };

        let shown = match cached {
            Some(mut tree) => {
                let ids: Vec<String> = tree
                    .items
                    .values()
                    .filter(|item| item.id != tree.root_id && !item.is_loaded())
                    .map(|item| item.id.clone())
                    .collect();
                self.merge_from_cache(&mut tree, &ids).await;
                let items = tree.len();
                self.publish_provisional(tree);
                tracing::debug!("Showing cached tree with {} items", items);
                Some(items)
            }
            None => None,
        };

        self.set_state(SyncState::LoadingFromRemote);
        shown
    }

    /// Merges fresh cache entries into `tree` for `ids`. Returns the number of
    /// hits and the ids that missed.
    async fn merge_from_cache(
        &self,
        tree: &mut TreeModel,
        ids: &[String],
    ) -> (usize, Vec<String>) {
        let mut hits = 0;
        let mut misses = Vec::new();

        for id in ids {
            let Some(expected) = tree.get(id).map(|item| item.updated_at().map(str::to_string))
            else {
                continue;
            };

            match self.notes.get_item(id).await {
                Ok(Some(cached)) if note_cache::is_fresh(&cached, expected.as_deref()) => {
                    if let Some(item) = tree.items.get_mut(id) {
                        merge_body(item, NotePatch::from(cached));
                    }
                    tracing::debug!("Cache hit: {}", id);
                    self.events.emit(SyncEvent::NoteLoaded {
                        id: id.clone(),
                        source: NoteSource::Cache,
                        timestamp: now_millis(),
                    });
                    hits += 1;
                }
                Ok(Some(_)) => {
                    tracing::debug!("Cache stale: {}", id);
                    misses.push(id.clone());
                }
                Ok(None) => {
                    tracing::debug!("Cache miss: {}", id);
                    misses.push(id.clone());
                }
                Err(e) => {
                    tracing::warn!("Failed to read cached note {}: {}", id, e);
                    misses.push(id.clone());
                }
            }
        }

        (hits, misses)
    }

    /// Fetches one note and writes it, laid over `base`, to the note cache.
    /// Returns the fields the server sent and the cached note. A cache write
    /// failure is logged but does not fail the fetch.
    async fn fetch_and_cache(
        &self,
        id: &str,
        base: Option<ItemData>,
    ) -> std::result::Result<(NotePatch, Note), RemoteError> {
        let mut patch = match self.remote.fetch_note(id).await {
            Ok(patch) => patch,
            Err(e) => {
                tracing::warn!("Failed to fetch note {}: {}", id, e);
                self.events.emit(SyncEvent::NoteFetchFailed {
                    id: id.to_string(),
                    error: e.to_string(),
                    timestamp: now_millis(),
                });
                return Err(e);
            }
        };
        patch.id = Some(id.to_string());
        patch.content.get_or_insert_with(String::new);
        let note = overlay_note(id, base, patch.clone());

        if let Err(e) = self.notes.set_item(id, note.clone()).await {
            tracing::warn!("Failed to cache note {}: {}", id, e);
        }
        tracing::debug!("Fetched note: {}", id);
        self.events.emit(SyncEvent::NoteLoaded {
            id: id.to_string(),
            source: NoteSource::Remote,
            timestamp: now_millis(),
        });
        Ok((patch, note))
    }

    /// The full note for `id`, fetching it if the tree only has metadata.
    ///
    /// Usable once the provisional tree is shown, so it may overlap `init`.
    /// The fetched fields are merged into whatever snapshot is current when
    /// the fetch completes. On failure the tree is left unchanged.
    pub async fn load_note_on_demand(&self, id: &str) -> Result<Note> {
        self.ensure_tree_shown()?;

        let snapshot = self.tree();
        let item = snapshot
            .get(id)
            .ok_or_else(|| SyncError::ItemNotFound(id.to_string()))?;
        if let Some(ItemData::Full(note)) = &item.data {
            return Ok(note.clone());
        }

        let (patch, note) = self.fetch_and_cache(id, item.data.clone()).await?;
        let tree = self.apply(|tree| Ok(note_tree::mutate_item(tree, id, ItemPatch::data(patch))))?;

        let merged = tree
            .get(id)
            .and_then(|item| item.data.as_ref())
            .and_then(ItemData::as_note)
            .cloned();
        Ok(merged.unwrap_or(note))
    }
}
