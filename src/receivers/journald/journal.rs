// SPDX-License-Identifier: Apache-2.0

//! Traits for journal access.
//!
//! The tail loop only talks to the journal through these traits. Any backend
//! that can seek by cursor and return entries in order can be plugged in.

use std::path::Path;
use std::time::Duration;

use crate::receivers::journald::entry::{Cursor, RawEntry};
use crate::receivers::journald::error::Result;

/// A sequential reader over the journal.
///
/// Reads are blocking but bounded by a timeout, so callers can check for
/// shutdown between reads.
pub trait Journal: Send {
    /// Position before the oldest entry
    fn seek_head(&mut self) -> Result<()>;

    /// Position so the newest existing entry is the next one returned
    fn seek_tail(&mut self) -> Result<()>;

    /// Position strictly after the entry identified by `cursor`.
    ///
    /// Fails with `Error::InvalidCursor` if the cursor cannot be resolved.
    fn seek_cursor(&mut self, cursor: &Cursor) -> Result<()>;

    /// Return the next entry, waiting at most `timeout` for one to appear.
    ///
    /// Returns `Ok(None)` if nothing new arrived in time.
    fn next_entry(&mut self, timeout: Duration) -> Result<Option<RawEntry>>;
}

/// Opens a journal at a configured location.
pub trait JournalOpener: Send + Sync + 'static {
    type Journal: Journal + 'static;

    /// Open the journal at `path`.
    ///
    /// Fails with `Error::JournalUnavailable` if the location cannot be accessed.
    fn open(&self, path: &Path) -> Result<Self::Journal>;
}
