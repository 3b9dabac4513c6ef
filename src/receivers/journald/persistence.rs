// SPDX-License-Identifier: Apache-2.0

//! JSON file-based storage with atomic writes.
//!
//! Stores a flat map of keys to JSON values. Writes go to a temp file which is
//! then renamed over the target, so readers never observe a partial file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::receivers::journald::error::{Error, Result};

/// Key holding the journal cursor in a storage file
pub const JOURNAL_KEY: &str = "journal";

/// A JSON object persisted to a single file
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    state: BTreeMap<String, serde_json::Value>,
}

impl JsonFileStorage {
    /// Open the storage at `path`, loading existing state if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = if path.exists() {
            let contents = fs::read_to_string(&path)
                .map_err(|e| Error::Persistence(format!("failed to open storage: {}", e)))?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&contents)
                    .map_err(|e| Error::Persistence(format!("failed to parse storage: {}", e)))?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self { path, state })
    }

    /// Storage at `path` starting from empty state, replacing the file on the next sync
    pub fn empty(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a string value; non-string values are treated as absent
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.state.get(key).and_then(|v| v.as_str())
    }

    pub fn set_string(&mut self, key: &str, value: impl Into<String>) {
        self.state
            .insert(key.to_string(), serde_json::Value::String(value.into()));
    }

    /// Write the current state to disk
    pub fn sync(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.state)
            .map_err(|e| Error::Persistence(format!("failed to serialize storage: {}", e)))?;
        atomic_write(&self.path, &bytes)
    }
}

/// Write `contents` to `path` atomically (write to temp, then rename)
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    use portable_atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create parent directory: {}", e))
            })?;
        }
    }

    // Unique per process and per write so concurrent writers never share a temp file
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let result = write_temp(&temp_path, contents).and_then(|()| {
        fs::rename(&temp_path, path)
            .map_err(|e| Error::Persistence(format!("failed to rename temp file: {}", e)))
    });
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_temp(temp_path: &Path, contents: &[u8]) -> Result<()> {
    let file = File::create(temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(contents)
        .map_err(|e| Error::Persistence(format!("failed to write temp file: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Persistence(format!("failed to flush temp file: {}", e)))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| Error::Persistence(format!("failed to sync temp file: {}", e)))
}
