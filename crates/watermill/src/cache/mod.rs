//! Watermarked results on disk.
//!
//! A result lives at `<dir>/<user_id>/<source file name>`. User ids are
//! validated identifiers, so the user directory never escapes `dir` and
//! distinct pairs never share a path. The file's
//! existence is the only freshness signal: a completed row whose file is
//! gone is treated as a miss.

pub mod reaper;

use std::path::{Path, PathBuf};

use crate::error::StorageError;

pub use reaper::{CacheReaper, ReapReport, ReaperHandle};

#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic cache location for `user_id`'s copy of `source`.
    pub fn path_for(&self, user_id: &str, source: &Path) -> Result<PathBuf, StorageError> {
        let file_name = source
            .file_name()
            .ok_or_else(|| StorageError::InvalidFileName(source.to_path_buf()))?;

        Ok(self.dir.join(user_id).join(file_name))
    }

    pub fn ensure_dir(&self) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StorageError::CreateDirectory {
            path: self.dir.clone(),
            source: e,
        })
    }

    /// Creates the directory that will hold `path`.
    pub fn ensure_parent(&self, path: &Path) -> Result<(), StorageError> {
        let parent = path.parent().unwrap_or(&self.dir);
        std::fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
            path: parent.to_path_buf(),
            source: e,
        })
    }

    pub fn is_present(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Deletes a cached result. Returns `false` if it was already gone.
    pub fn remove(&self, path: &Path) -> Result<bool, StorageError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::RemoveFile {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}
