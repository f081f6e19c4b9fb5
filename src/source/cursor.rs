use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("cursor io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("corrupt cursor file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Committed position within one monitored file.
///
/// The offset only covers lines whose records have been handed to the
/// scheduler, so a restart never skips a line that was still buffered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub path: PathBuf,
    /// Byte offset just past the last committed line
    pub offset: u64,
    pub rotation_id: u64,
    #[serde(rename = "time")]
    pub saved_at: DateTime<Utc>,
    /// Bumped whenever the reader reopens or rewinds the file; not persisted
    #[serde(skip)]
    pub generation: u64,
}

impl Cursor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            rotation_id: 0,
            saved_at: Utc::now(),
            generation: 0,
        }
    }

    /// Move forward to `position` if it belongs to the current file generation.
    /// Returns whether the offset changed.
    pub fn advance(&mut self, position: Position) -> bool {
        if position.generation != self.generation
            || position.rotation_id != self.rotation_id
            || position.offset <= self.offset
        {
            return false;
        }
        self.offset = position.offset;
        true
    }
}

/// End of one handed-out line, tagged with the file it was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub offset: u64,
    pub rotation_id: u64,
    pub generation: u64,
}

/// Cursor shared between a reader and whoever persists it
pub type SharedCursor = Arc<Mutex<Cursor>>;

/// Loads and saves cursor sidecar files.
///
/// With a directory configured, each monitored path maps to
/// `<dir>/<sanitized path>.cursor`; otherwise the sidecar sits next to the
/// log as `<path>.cursor`.
#[derive(Debug, Clone, Default)]
pub struct CursorStore {
    dir: Option<PathBuf>,
}

impl CursorStore {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn sidecar_path(&self, path: &Path) -> PathBuf {
        match &self.dir {
            Some(dir) => {
                let sanitized: String = path
                    .to_string_lossy()
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
                    .collect();
                dir.join(format!("{}.cursor", sanitized.trim_start_matches('_')))
            }
            None => {
                let mut name = path.as_os_str().to_os_string();
                name.push(".cursor");
                PathBuf::from(name)
            }
        }
    }

    /// Load the persisted cursor for `path`, if any
    pub fn load(&self, path: &Path) -> Result<Option<Cursor>, CursorError> {
        let sidecar = self.sidecar_path(path);
        let content = match fs::read_to_string(&sidecar) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CursorError::Io {
                    path: sidecar,
                    source,
                })
            }
        };

        let cursor = serde_json::from_str(&content).map_err(|source| CursorError::Corrupt {
            path: sidecar.clone(),
            source,
        })?;
        debug!(sidecar = %sidecar.display(), "Loaded cursor");
        Ok(Some(cursor))
    }

    /// Persist atomically: write a temp file next to the sidecar, then rename over it
    pub fn save(&self, cursor: &Cursor) -> Result<(), CursorError> {
        let sidecar = self.sidecar_path(&cursor.path);
        let io_err = |source| CursorError::Io {
            path: sidecar.clone(),
            source,
        };

        if let Some(parent) = sidecar.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let mut stamped = cursor.clone();
        stamped.saved_at = Utc::now();
        let json = serde_json::to_vec_pretty(&stamped).map_err(|source| CursorError::Corrupt {
            path: sidecar.clone(),
            source,
        })?;

        let mut tmp_name = sidecar.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, &sidecar).map_err(io_err)?;
        Ok(())
    }

    /// Snapshot a shared cursor and save it, logging rather than failing
    pub fn save_shared(&self, cursor: &SharedCursor) {
        let snapshot = cursor.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Err(e) = self.save(&snapshot) {
            warn!(error = %e, "Failed to persist cursor");
        }
    }

    /// Advance a shared cursor to `position` and persist it. Stale positions
    /// from a rotated or truncated generation are ignored.
    pub fn commit(&self, cursor: &SharedCursor, position: Position) {
        let snapshot = {
            let mut guard = cursor.lock().unwrap_or_else(|e| e.into_inner());
            if !guard.advance(position) {
                return;
            }
            guard.clone()
        };
        if let Err(e) = self.save(&snapshot) {
            warn!(error = %e, "Failed to persist cursor");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sidecar_next_to_log() {
        let store = CursorStore::new(None);
        assert_eq!(
            store.sidecar_path(Path::new("/var/log/app.log")),
            PathBuf::from("/var/log/app.log.cursor")
        );
    }

    #[test]
    fn test_sidecar_in_dir_is_sanitized() {
        let store = CursorStore::new(Some(PathBuf::from("/state")));
        assert_eq!(
            store.sidecar_path(Path::new("/var/log/app.log")),
            PathBuf::from("/state/var_log_app.log.cursor")
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = CursorStore::new(Some(dir.path().join("cursors")));
        let log = dir.path().join("app.log");

        assert!(store.load(&log).unwrap().is_none());

        let mut cursor = Cursor::new(&log);
        cursor.offset = 42;
        cursor.rotation_id = 7;
        store.save(&cursor).unwrap();

        let loaded = store.load(&log).unwrap().unwrap();
        assert_eq!(loaded.offset, 42);
        assert_eq!(loaded.rotation_id, 7);
        assert_eq!(loaded.path, log);
    }

    #[test]
    fn test_wire_format_field_names() {
        let dir = TempDir::new().unwrap();
        let store = CursorStore::new(None);
        let log = dir.path().join("app.log");
        store.save(&Cursor::new(&log)).unwrap();

        let raw = fs::read_to_string(store.sidecar_path(&log)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        for field in ["path", "offset", "rotation_id", "time"] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }
    }

    #[test]
    fn test_corrupt_cursor_is_error() {
        let dir = TempDir::new().unwrap();
        let store = CursorStore::new(None);
        let log = dir.path().join("app.log");
        fs::write(store.sidecar_path(&log), "not json").unwrap();
        assert!(matches!(store.load(&log), Err(CursorError::Corrupt { .. })));
    }

    #[test]
    fn test_commit_ignores_stale_generation() {
        let dir = TempDir::new().unwrap();
        let store = CursorStore::new(Some(dir.path().join("cursors")));
        let log = dir.path().join("app.log");

        let mut cursor = Cursor::new(&log);
        cursor.rotation_id = 3;
        cursor.generation = 2;
        let shared: SharedCursor = Arc::new(Mutex::new(cursor));

        let at = |offset, generation| Position {
            offset,
            rotation_id: 3,
            generation,
        };
        store.commit(&shared, at(10, 2));
        assert_eq!(store.load(&log).unwrap().unwrap().offset, 10);

        // Lines from before a rewind, and going backwards, change nothing
        store.commit(&shared, at(50, 1));
        store.commit(&shared, at(5, 2));
        assert_eq!(shared.lock().unwrap().offset, 10);
        assert_eq!(store.load(&log).unwrap().unwrap().offset, 10);
    }
}
