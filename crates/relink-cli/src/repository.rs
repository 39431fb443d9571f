//! File-backed pattern repository
//!
//! The map lives in one JSON object file. Writes go to a temporary file in
//! the same directory that is persisted over the target, so readers never
//! see a partial map.

use parking_lot::Mutex;
use relink_engine::{PatternReferenceMap, PatternRepository, RepositoryError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Pattern map stored as JSON on disk
#[derive(Debug)]
pub struct FilePatternRepository {
    path: PathBuf,
    /// Serialises read-merge-write cycles within this process
    write_lock: Mutex<()>,
}

impl FilePatternRepository {
    /// Repository stored at `path`; the file need not exist yet
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the map file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<PatternReferenceMap, RepositoryError> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(PatternReferenceMap::new()),
            Ok(text) => serde_json::from_str(&text).map_err(|e| RepositoryError::Corrupt(format!("{}: {e}", self.path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(PatternReferenceMap::new()),
            Err(e) => Err(storage(&self.path, &e)),
        }
    }

    fn write(&self, map: &PatternReferenceMap) -> Result<(), RepositoryError> {
        let text = serde_json::to_string_pretty(map).map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| storage(dir, &e))?;
        let mut staging = NamedTempFile::new_in(dir).map_err(|e| storage(dir, &e))?;
        staging
            .write_all(text.as_bytes())
            .and_then(|()| staging.as_file().sync_all())
            .map_err(|e| storage(staging.path(), &e))?;
        staging.persist(&self.path).map_err(|e| storage(&self.path, &e.error))?;
        debug!(path = %self.path.display(), entries = map.len(), "pattern map written");
        Ok(())
    }
}

impl PatternRepository for FilePatternRepository {
    fn load(&self) -> Result<PatternReferenceMap, RepositoryError> {
        self.read()
    }

    fn merge_save(&self, additions: &PatternReferenceMap) -> Result<PatternReferenceMap, RepositoryError> {
        let _guard = self.write_lock.lock();
        let mut map = self.read()?;
        map.merge(additions);
        self.write(&map)?;
        Ok(map)
    }

    fn clear(&self) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage(&self.path, &e)),
        }
    }
}

fn storage(path: &Path, error: &std::io::Error) -> RepositoryError {
    RepositoryError::Storage(format!("{}: {error}", path.display()))
}
