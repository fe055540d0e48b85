//! notes-sync library: native storage, HTTP transport and CLI plumbing.
//!
//! A thin layer over sync-core, exposed as a library so integration tests
//! can drive the same client the binary runs.

pub mod config;
pub mod file_store;
pub mod http_remote;
pub mod render;

use anyhow::{Context, Result};
use std::sync::Arc;
use sync_core::SyncOrchestrator;

pub use config::{Args, ClientConfig, Command};
pub use file_store::FileStore;
pub use http_remote::HttpRemote;

/// The orchestrator wired to the on-disk cache and the notes server.
pub type NotesClient = SyncOrchestrator<FileStore, HttpRemote>;

/// Builds a client for `config`. Fails when no server URL is configured.
pub fn connect(config: &ClientConfig, store: Arc<FileStore>) -> Result<NotesClient> {
    let server_url = config
        .server_url
        .as_deref()
        .context("no server configured (set --server or NOTES_SERVER_URL)")?;
    let remote = HttpRemote::new(server_url, config.timeout)
        .with_context(|| format!("failed to build HTTP client for {}", server_url))?;
    Ok(SyncOrchestrator::new(store, remote, config.sync.clone()))
}
