// SPDX-License-Identifier: Apache-2.0

//! Persisted resume position for a receiver instance.
//!
//! The cursor is opaque here: it is stored and returned verbatim. The tail loop
//! only calls `save` after the sink has accepted the batch the cursor covers.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::receivers::journald::entry::Cursor;
use crate::receivers::journald::error::{Error, Result};
use crate::receivers::journald::persistence::{JOURNAL_KEY, JsonFileStorage, atomic_write};

/// Where reading starts after the journal is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumePolicy {
    FromHead,
    FromTail,
    FromCursor(Cursor),
}

impl ResumePolicy {
    /// A stored cursor always wins over the configured cold-start position.
    pub fn select(stored: Option<Cursor>, read_from_head: bool) -> Self {
        match stored {
            Some(cursor) => ResumePolicy::FromCursor(cursor),
            None => Self::cold_start(read_from_head),
        }
    }

    pub fn cold_start(read_from_head: bool) -> Self {
        if read_from_head {
            ResumePolicy::FromHead
        } else {
            ResumePolicy::FromTail
        }
    }
}

#[derive(Debug)]
pub enum PositionStore {
    /// Plain text file holding only the cursor
    PosFile {
        path: PathBuf,
        last_saved: Option<Cursor>,
    },
    /// JSON storage file with the cursor under the `journal` key
    Storage {
        storage: JsonFileStorage,
        /// Cursor known to be on disk
        last_synced: Option<Cursor>,
    },
    /// No persistence across restarts
    Memory(Option<Cursor>),
}

impl PositionStore {
    pub fn pos_file(path: impl AsRef<Path>) -> Self {
        PositionStore::PosFile {
            path: path.as_ref().to_path_buf(),
            last_saved: None,
        }
    }

    /// Open a JSON storage file. A file that cannot be parsed is logged and
    /// replaced on the next save.
    pub fn storage(path: impl AsRef<Path>) -> Self {
        match JsonFileStorage::open(path.as_ref()) {
            Ok(storage) => {
                let last_synced = storage.get_string(JOURNAL_KEY).map(Cursor::from);
                PositionStore::Storage {
                    storage,
                    last_synced,
                }
            }
            Err(e) => {
                warn!(
                    path = %path.as_ref().display(),
                    error = %e,
                    "Unreadable storage file, starting without a stored cursor"
                );
                PositionStore::Storage {
                    storage: JsonFileStorage::empty(path),
                    last_synced: None,
                }
            }
        }
    }

    pub fn memory() -> Self {
        PositionStore::Memory(None)
    }

    /// Build the store for the configured paths; `pos_file` wins over `storage_path`.
    pub fn from_paths(pos_file: Option<&Path>, storage_path: Option<&Path>) -> Self {
        match (pos_file, storage_path) {
            (Some(path), _) => Self::pos_file(path),
            (None, Some(path)) => Self::storage(path),
            (None, None) => Self::memory(),
        }
    }

    pub fn is_persistent(&self) -> bool {
        !matches!(self, PositionStore::Memory(_))
    }

    /// Human readable location, used in log messages
    pub fn describe(&self) -> String {
        match self {
            PositionStore::PosFile { path, .. } => path.display().to_string(),
            PositionStore::Storage { storage, .. } => storage.path().display().to_string(),
            PositionStore::Memory(_) => "memory".to_string(),
        }
    }

    /// Load the stored cursor, if any. Empty or whitespace-only content is absent.
    pub fn load(&self) -> Result<Option<Cursor>> {
        match self {
            PositionStore::PosFile { path, .. } => match fs::read_to_string(path) {
                Ok(contents) => {
                    let token = contents.trim();
                    if token.is_empty() {
                        Ok(None)
                    } else {
                        Ok(Some(Cursor::from(token)))
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(Error::Persistence(format!(
                    "failed to read pos file {}: {}",
                    path.display(),
                    e
                ))),
            },
            PositionStore::Storage { storage, .. } => Ok(storage
                .get_string(JOURNAL_KEY)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Cursor::from)),
            PositionStore::Memory(cursor) => Ok(cursor.clone()),
        }
    }

    pub fn save(&mut self, cursor: &Cursor) -> Result<()> {
        match self {
            PositionStore::PosFile { path, last_saved } => {
                if last_saved.as_ref() == Some(cursor) {
                    return Ok(());
                }
                atomic_write(path, cursor.as_str().as_bytes())?;
                *last_saved = Some(cursor.clone());
                Ok(())
            }
            PositionStore::Storage {
                storage,
                last_synced,
            } => {
                if last_synced.as_ref() == Some(cursor) {
                    return Ok(());
                }
                storage.set_string(JOURNAL_KEY, cursor.as_str());
                storage.sync()?;
                *last_synced = Some(cursor.clone());
                Ok(())
            }
            PositionStore::Memory(stored) => {
                *stored = Some(cursor.clone());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURSOR: &str = "s=add4782f78ca4b6e84aa88d34e5b4a9d;i=13f;b=4737ffc504774b3ba67020bc947f1bc0;m=ffadd;t=4d905e49a6291;x=9a11dd9ffee96e9f";

    #[test]
    fn test_resume_policy_prefers_stored_cursor() {
        assert_eq!(
            ResumePolicy::select(Some(Cursor::from("c1")), false),
            ResumePolicy::FromCursor(Cursor::from("c1"))
        );
        assert_eq!(ResumePolicy::select(None, true), ResumePolicy::FromHead);
        assert_eq!(ResumePolicy::select(None, false), ResumePolicy::FromTail);
    }

    #[test]
    fn test_pos_file_missing_is_absent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = PositionStore::pos_file(temp_dir.path().join("foo.pos"));
        assert!(store.load().unwrap().is_none());
        assert!(store.is_persistent());
    }

    #[test]
    fn test_pos_file_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("foo.pos");

        let mut store = PositionStore::pos_file(&path);
        store.save(&Cursor::from(CURSOR)).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), CURSOR);

        let reopened = PositionStore::pos_file(&path);
        assert_eq!(reopened.load().unwrap(), Some(Cursor::from(CURSOR)));
    }

    #[test]
    fn test_pos_file_ignores_trailing_newline_and_empty_content() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("foo.pos");

        std::fs::write(&path, format!("{}\n", CURSOR)).unwrap();
        let store = PositionStore::pos_file(&path);
        assert_eq!(store.load().unwrap(), Some(Cursor::from(CURSOR)));

        std::fs::write(&path, "  \n").unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_pos_file_content_is_not_interpreted() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("foo.pos");
        std::fs::write(&path, "thisisinvalid").unwrap();

        let store = PositionStore::pos_file(&path);
        assert_eq!(store.load().unwrap(), Some(Cursor::from("thisisinvalid")));
    }

    #[test]
    fn test_storage_keeps_cursor_under_journal_key() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("storage.json");

        let mut store = PositionStore::storage(&path);
        assert!(store.load().unwrap().is_none());
        store.save(&Cursor::from(CURSOR)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["journal"], CURSOR);

        let reopened = PositionStore::storage(&path);
        assert_eq!(reopened.load().unwrap(), Some(Cursor::from(CURSOR)));
    }

    #[test]
    fn test_unreadable_storage_starts_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("storage.json");
        std::fs::write(&path, "not valid json {{{").unwrap();

        let mut store = PositionStore::storage(&path);
        assert!(store.load().unwrap().is_none());

        store.save(&Cursor::from("c1")).unwrap();
        let reopened = PositionStore::storage(&path);
        assert_eq!(reopened.load().unwrap(), Some(Cursor::from("c1")));
    }

    #[test]
    fn test_storage_save_retries_after_failed_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("storage.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), "x").unwrap();

        let mut store = PositionStore::storage(&path);
        assert!(store.save(&Cursor::from("c1")).is_err());

        std::fs::remove_dir_all(&path).unwrap();
        store.save(&Cursor::from("c1")).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["journal"], "c1");
    }

    #[test]
    fn test_memory_store() {
        let mut store = PositionStore::memory();
        assert!(!store.is_persistent());
        assert_eq!(store.describe(), "memory");
        assert!(store.load().unwrap().is_none());

        store.save(&Cursor::from("c1")).unwrap();
        assert_eq!(store.load().unwrap(), Some(Cursor::from("c1")));
    }

    #[test]
    fn test_from_paths_prefers_pos_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pos = temp_dir.path().join("foo.pos");
        let storage = temp_dir.path().join("storage.json");

        let store = PositionStore::from_paths(Some(&pos), Some(&storage));
        assert_eq!(store.describe(), pos.display().to_string());

        let store = PositionStore::from_paths(None, Some(&storage));
        assert!(matches!(store, PositionStore::Storage { .. }));

        let store = PositionStore::from_paths(None, None);
        assert!(matches!(store, PositionStore::Memory(None)));
    }
}
