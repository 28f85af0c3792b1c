//! Persisted project state.
//!
//! Two logical stores live side by side in one string-keyed, JSON-valued
//! key-value space:
//!
//! - the project blob under [`PROJECT_KEY`], covering every track plus tempo
//!   and scale
//! - one per-track blob under [`track_key`], written by piano-roll sessions
//!
//! The reconciler merges them on load and keeps both updated on save.

mod blob;
mod reconcile;

pub use blob::{
    entries_from_notes, notes_from_entries, NoteEntry, PerTrackBlob, ProjectBlob, StoredNote,
    TrackBlob,
};
pub use reconcile::{
    merge, now_millis, piano_roll_merge, snapshot, validate, Corruption, LoadOutcome, LoadReport,
    ProjectState, Reconciler, SessionDefaults,
};

use crate::pattern::TrackId;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Key of the monolithic project blob.
pub const PROJECT_KEY: &str = "soundbytez-daw-data";

/// Prefix of per-track blob keys.
pub const TRACK_KEY_PREFIX: &str = "soundbytez-track-";

/// Key of the per-track blob for `id`.
pub fn track_key(id: TrackId) -> String {
    format!("{}{}", TRACK_KEY_PREFIX, id.as_u32())
}

/// Errors that can occur while reading or writing persisted state.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A string-keyed store of JSON documents.
///
/// Reads and writes are synchronous from the caller's point of view.
pub trait KeyValueStore {
    /// Returns the value under `key`, or None if nothing is stored.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Stores `value` under `key`, replacing what was there.
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes `key`. Removing a missing key is not an error.
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

/// In-memory store, used by tests and as a scratch backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Directory-backed store: one `<key>.json` file per key.
///
/// Lets the main view and a piano-roll session run as separate processes
/// that share state only through the files.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
