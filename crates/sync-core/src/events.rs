//! Progress and failure notifications from the orchestrator.
//!
//! A UI layer subscribes to the [`EventBus`] to learn when a provisional or
//! final tree is published, when note bodies arrive, and when edits fail to
//! reach the server. Events are plain data and serialize to camelCase JSON.

use crate::orchestrator::SyncState;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use web_time::{SystemTime, UNIX_EPOCH};

/// Where a note body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NoteSource {
    Cache,
    Remote,
}

/// Events emitted while loading and editing the tree.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// The orchestrator moved to a new lifecycle state.
    StateChanged { state: SyncState, timestamp: f64 },
    /// A new tree snapshot became current.
    TreePublished {
        /// True for the cache-only tree shown before the server answers.
        provisional: bool,
        items: usize,
        timestamp: f64,
    },
    /// A note body was merged into the tree.
    NoteLoaded {
        id: String,
        source: NoteSource,
        timestamp: f64,
    },
    /// Fetching one note failed. The rest of the batch is unaffected.
    NoteFetchFailed {
        id: String,
        error: String,
        timestamp: f64,
    },
    /// A local edit could not be sent to the server. The local state is kept.
    SyncFailed {
        /// "move", "mutate", "create", "update" or "delete".
        operation: String,
        id: Option<String>,
        error: String,
        timestamp: f64,
    },
    /// Cached notes dropped because they are no longer in the tree.
    CacheEvicted { ids: Vec<String>, timestamp: f64 },
}

impl SyncEvent {
    /// Event time in milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> f64 {
        match self {
            SyncEvent::StateChanged { timestamp, .. }
            | SyncEvent::TreePublished { timestamp, .. }
            | SyncEvent::NoteLoaded { timestamp, .. }
            | SyncEvent::NoteFetchFailed { timestamp, .. }
            | SyncEvent::SyncFailed { timestamp, .. }
            | SyncEvent::CacheEvicted { timestamp, .. } => *timestamp,
        }
    }

    /// True for events reporting something that went wrong.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SyncEvent::NoteFetchFailed { .. } | SyncEvent::SyncFailed { .. }
        )
    }
}

/// Milliseconds since the Unix epoch, for event timestamps.
pub fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64() * 1000.0)
        .unwrap_or_default()
}

type Listener = Arc<dyn Fn(SyncEvent) + Send + Sync>;

/// Keeps a listener registered. Dropping it unsubscribes.
#[must_use = "the listener is removed as soon as the subscription is dropped"]
pub struct Subscription {
    bus: Weak<EventBus>,
    key: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.key);
        }
    }
}

/// Fan-out of [`SyncEvent`]s to registered listeners, in subscription order.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<BTreeMap<u64, Listener>>,
    next_key: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::new(listener));
        Subscription {
            bus: Arc::downgrade(self),
            key,
        }
    }

    fn remove(&self, key: u64) {
        // never block inside Drop
        if let Ok(mut listeners) = self.listeners.try_write() {
            listeners.remove(&key);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Delivers `event` to every listener registered when the call starts.
    pub fn emit(&self, event: SyncEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        tracing::trace!("Emitting {:?} to {} listeners", event, listeners.len());

        for listener in listeners {
            listener(event.clone());
        }
    }
}
