//! JSON file helpers shared by the file-backed stores.
//!
//! Writes go to a sibling temp file that is renamed into place, so a reader
//! never observes a half-written record. A `.lock` file next to the target is
//! held exclusively for the duration of a write and shared during reads.

use crate::domain::errors::StoreError;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn lock_path(path: &Path) -> PathBuf {
    path.with_extension("lock")
}

fn open_lock(path: &Path) -> Result<File, StoreError> {
    let lock = lock_path(path);
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock)
        .map_err(|e| io_err(&lock, e))
}

/// Serializes `value` and atomically replaces `path` with it.
pub fn write_json_atomic<T: Serialize>(
    path: &Path,
    what: &'static str,
    value: &T,
) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let content = serde_json::to_string_pretty(value)
        .map_err(|source| StoreError::Encode { what, source })?;

    let lock = open_lock(path)?;
    lock.lock_exclusive().map_err(|e| io_err(path, e))?;

    let temp_path = path.with_extension("json.tmp");
    let result = fs::write(&temp_path, &content)
        .map_err(|e| io_err(&temp_path, e))
        .and_then(|()| fs::rename(&temp_path, path).map_err(|e| io_err(path, e)));

    if let Err(e) = FileExt::unlock(&lock) {
        tracing::debug!("Failed to release lock for {}: {}", path.display(), e);
    }
    result
}

/// Reads and parses `path`. Returns `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(
    path: &Path,
    what: &'static str,
) -> Result<Option<T>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path, e)),
    };
    let lock = open_lock(path)?;
    lock.lock_shared().map_err(|e| io_err(path, e))?;
    let parsed = serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
        what,
        path: path.to_path_buf(),
        source,
    });
    if let Err(e) = FileExt::unlock(&lock) {
        tracing::debug!("Failed to release lock for {}: {}", path.display(), e);
    }
    parsed.map(Some)
}

/// Lists `*.json` files directly under `dir`. Missing directory yields an empty list.
pub fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(dir, e)),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| io_err(dir, e))?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Maps an arbitrary key to a file-name-safe stem.
pub fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
