//! File-backed key/value store using tokio::fs.
//!
//! Each key maps to one JSON file under the cache directory: `tree` becomes
//! `tree.json`, `notes/abc` becomes `notes/abc.json`. Writes go to a temp
//! file first and are renamed into place so a crash never leaves a torn value.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use sync_core::store::{KeyValueStore, Result, StoreError};
use tokio::fs;

const EXTENSION: &str = "json";

/// Cache directory store for the native client
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Maps a key to its file. Every `/`-separated segment must be a plain
    /// name so a key can never escape the cache directory.
    fn key_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key.split('/').all(|segment| {
                !segment.is_empty() && segment.chars().all(note_tree::links::is_note_id_char)
            });
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(format!("{}.{}", key, EXTENSION)))
    }

    async fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
        let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));

        if let Err(e) = fs::write(&temp_path, content).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }
        Ok(())
    }
}

fn io_error(context: &Path, e: std::io::Error) -> StoreError {
    StoreError::Io(format!("{}: {}", context.display(), e))
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.key_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.key_path(key)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        Self::atomic_write(&path, value)
            .await
            .map_err(|e| io_error(&path, e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![(self.base_path.clone(), String::new())];

        while let Some((dir, key_prefix)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&dir, e)),
            };

            while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
                let name = entry.file_name().to_string_lossy().to_string();
                let file_type = entry.file_type().await.map_err(|e| io_error(&dir, e))?;

                if file_type.is_dir() {
                    pending.push((entry.path(), format!("{}{}/", key_prefix, name)));
                } else if let Some(stem) = name.strip_suffix(".json") {
                    // temp files look like `<stem>.<uuid>.tmp` and never match
                    let key = format!("{}{}", key_prefix, stem);
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
