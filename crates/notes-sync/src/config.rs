use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use sync_core::SyncConfig;
use sync_core::config::DEFAULT_PRELOAD_COUNT;

#[derive(Parser, Debug)]
#[command(name = "notes-sync")]
#[command(about = "Offline-first client for the notes server")]
pub struct Args {
    /// Base URL of the notes server
    #[arg(long, env = "NOTES_SERVER_URL")]
    pub server: Option<String>,

    /// Directory holding the tree and note caches (supports ~)
    #[arg(long, env = "NOTES_CACHE_DIR", default_value = "~/.cache/notes-sync")]
    pub cache_dir: String,

    /// Number of recently updated notes to fetch on startup
    #[arg(long, env = "PRELOAD_NOTES_COUNT", default_value_t = DEFAULT_PRELOAD_COUNT)]
    pub preload: usize,

    /// Per-request timeout in seconds
    #[arg(long, env = "NOTES_REQUEST_TIMEOUT", default_value_t = 8)]
    pub timeout_secs: u64,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Load the tree and preload recent notes, then print a summary
    Sync,
    /// Print one note, fetching it if needed
    Show { id: String },
    /// Print the cached tree
    Tree,
    /// List cached notes linking to a note
    Backlinks { id: String },
}

/// Resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: Option<String>,
    pub cache_dir: PathBuf,
    pub timeout: Duration,
    pub sync: SyncConfig,
}

impl Args {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server_url: self.server.clone(),
            cache_dir: expand_tilde(&self.cache_dir),
            timeout: Duration::from_secs(self.timeout_secs),
            sync: SyncConfig::default().with_preload_count(self.preload),
        }
    }
}

/// Expand ~ or ~/ prefix to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}
