//! sync-core: offline-first loading and editing of a note tree.
//!
//! This crate provides the core functionality for:
//! - Persisting the tree and per-note bodies in a key/value store
//! - Loading the tree from cache first, then from the notes server
//! - Preloading recently updated notes and fetching the rest on demand
//! - Applying structural edits locally and submitting them to the server
//! - KeyValueStore and remote service trait abstractions

pub mod config;
pub mod events;
pub mod id;
pub mod note_cache;
pub mod orchestrator;
pub mod remote;
pub mod store;
pub mod tree_store;

pub use config::{ConfigError, SyncConfig};
pub use events::{EventBus, NoteSource, Subscription, SyncEvent};
pub use id::gen_note_id;
pub use note_cache::{CachedNote, NoteCache};
pub use orchestrator::{
    FetchFailure, InitReport, SyncError, SyncOrchestrator, SyncState, partition_by_recency,
};
pub use remote::{MutateFields, RemoteError, RemoteNoteService, RemoteTreeService, TreeAction};
pub use store::{InMemoryStore, KeyValueStore, StoreError};
pub use tree_store::{TreeStore, TreeStoreError};
