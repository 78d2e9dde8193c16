//! Local persistence under the scratch directory.
//!
//! ```text
//! <scratch>/
//!   session.json        # The active session, removed on cleanup
//!   metrics.sqlite      # Per-strategy setup metrics
//!   deployments.jsonl   # Append-only deployment log
//!   backups/<session>/  # Compressed backups, live for one deployment
//!   envs/<id>/          # One scratch directory per virtual environment
//! ```

mod deployments;
mod metrics;
mod session;

use std::{fs, io, path::PathBuf};

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt data: {0}")]
    Corrupt(String),
}

pub type Result<T> = core::result::Result<T, StorageError>;

/// File-based storage rooted at the scratch directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Creates a new storage instance rooted at the given directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Parent directory of every deployment session's backups.
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Parent directory of every virtual environment's scratch directory.
    pub fn envs_dir(&self) -> PathBuf {
        self.root.join("envs")
    }

    fn session_path(&self) -> PathBuf {
        self.root.join("session.json")
    }

    fn metrics_path(&self) -> PathBuf {
        self.root.join("metrics.sqlite")
    }

    fn deployments_path(&self) -> PathBuf {
        self.root.join("deployments.jsonl")
    }
}

#[cfg(test)]
pub(crate) fn test_storage() -> (tempfile::TempDir, Storage) {
    let dir = tempfile::TempDir::new().unwrap();
    let storage = Storage::new(dir.path().join(".stagelink")).unwrap();
    (dir, storage)
}
