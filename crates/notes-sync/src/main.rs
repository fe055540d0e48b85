//! notes-sync: offline-first command line client for the notes server.
//!
//! Keeps a JSON cache of the tree and note bodies under the cache directory,
//! so `tree` and `backlinks` work without a network connection.

use anyhow::{Context, Result};
use clap::Parser;
use note_tree::make_hierarchy;
use std::sync::Arc;
use sync_core::{NoteCache, SyncEvent, TreeStore};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use notes_sync::render::{render_backlinks, render_hierarchy, render_report};
use notes_sync::{Args, Command, FileStore, connect};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug,notes_sync=debug,sync_core=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,notes_sync=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = args.client_config();
    debug!("Cache directory: {}", config.cache_dir.display());
    let store = Arc::new(FileStore::new(&config.cache_dir));

    match args.command {
        Command::Sync => {
            let client = connect(&config, store)?;
            let _events = client.events().subscribe(|event| {
                if let SyncEvent::TreePublished {
                    provisional: true,
                    items,
                    ..
                } = event
                {
                    info!("Showing cached tree ({} items)", items);
                }
            });
            let report = client.init().await.context("sync failed")?;
            print!("{}", render_report(&report));
        }
        Command::Show { id } => {
            let client = connect(&config, store)?;
            if let Err(e) = client.init().await {
                warn!("Working offline: {}", e);
            }
            let note = client
                .load_note_on_demand(&id)
                .await
                .with_context(|| format!("failed to load note {}", id))?;
            if !note.meta.title.is_empty() {
                println!("# {}\n", note.meta.title);
            }
            println!("{}", note.content);
        }
        Command::Tree => {
            let tree = TreeStore::new(store)
                .get()
                .await
                .context("failed to read cached tree")?;
            match make_hierarchy(&tree) {
                Some(hierarchy) => print!("{}", render_hierarchy(&hierarchy)),
                None => warn!("Cached tree has no root"),
            }
        }
        Command::Backlinks { id } => {
            let sources = NoteCache::new(store)
                .backlinks(&id)
                .await
                .context("failed to scan note cache")?;
            print!("{}", render_backlinks(&id, &sources));
        }
    }

    Ok(())
}
