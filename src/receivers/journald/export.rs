// SPDX-License-Identifier: Apache-2.0

//! Journal backend reading JSON export files.
//!
//! Reads the line-delimited JSON produced by `journalctl -o json`. The
//! configured path is either a single file or a directory whose `*.json` and
//! `*.jsonl` files are read in file name order. Appended lines and new files
//! are picked up by polling.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::receivers::journald::entry::{Cursor, RawEntry};
use crate::receivers::journald::error::{Error, Result};
use crate::receivers::journald::journal::{Journal, JournalOpener};

const CURSOR_FIELD: &str = "__CURSOR";
const REALTIME_FIELD: &str = "__REALTIME_TIMESTAMP";
const ADDRESS_FIELD_PREFIX: &str = "__";

/// Default interval between checks for appended data
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Opens [`ExportJournal`]s
#[derive(Debug, Clone)]
pub struct ExportJournalOpener {
    poll_interval: Duration,
}

impl Default for ExportJournalOpener {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ExportJournalOpener {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl JournalOpener for ExportJournalOpener {
    type Journal = ExportJournal;

    fn open(&self, path: &Path) -> Result<ExportJournal> {
        ExportJournal::open(path, self.poll_interval)
    }
}

/// Position of the next line to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadPosition {
    /// Index into `sources`
    source: usize,
    /// Byte offset of the next unread line
    offset: u64,
    /// 1-based number of the next unread line
    line: u64,
    /// The previous line was read before its newline was written
    after_unterminated: bool,
}

impl ReadPosition {
    fn start_of(source: usize) -> Self {
        Self {
            source,
            offset: 0,
            line: 1,
            after_unterminated: false,
        }
    }

    fn at(source: usize, line: &Line) -> Self {
        Self {
            source,
            offset: line.start,
            line: line.number,
            after_unterminated: false,
        }
    }

    fn after(source: usize, line: &Line) -> Self {
        Self {
            source,
            offset: line.end,
            line: line.number + 1,
            after_unterminated: !line.terminated,
        }
    }
}

/// One complete line of a source file
struct Line {
    start: u64,
    end: u64,
    number: u64,
    text: String,
    terminated: bool,
}

enum ReadOutcome {
    Line(Line),
    /// A trailing line without its newline yet
    Incomplete,
    Eof,
}

pub struct ExportJournal {
    root: PathBuf,
    is_dir: bool,
    poll_interval: Duration,
    sources: Vec<PathBuf>,
    pos: ReadPosition,
    reader: Option<BufReader<File>>,
}

impl ExportJournal {
    pub fn open(path: &Path, poll_interval: Duration) -> Result<Self> {
        let metadata = fs::metadata(path).map_err(|e| Error::JournalUnavailable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut journal = Self {
            root: path.to_path_buf(),
            is_dir: metadata.is_dir(),
            poll_interval,
            sources: Vec::new(),
            pos: ReadPosition::start_of(0),
            reader: None,
        };
        journal.refresh_sources()?;

        debug!(
            path = %journal.root.display(),
            files = journal.sources.len(),
            "Opened journal export"
        );
        Ok(journal)
    }

    /// Pick up files that appeared since the last listing
    fn refresh_sources(&mut self) -> Result<()> {
        if !self.is_dir {
            if self.sources.is_empty() {
                self.sources.push(self.root.clone());
            }
            return Ok(());
        }

        let entries = fs::read_dir(&self.root).map_err(|e| Error::JournalUnavailable {
            path: self.root.clone(),
            reason: e.to_string(),
        })?;

        let mut found: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_export_file(p))
            .filter(|p| !self.sources.contains(p))
            .collect();
        found.sort();

        if !found.is_empty() {
            debug!(count = found.len(), "Discovered new journal export files");
            self.sources.extend(found);
        }
        Ok(())
    }

    fn set_position(&mut self, pos: ReadPosition) {
        self.pos = pos;
        self.reader = None;
    }

    fn end_position(&self) -> Result<ReadPosition> {
        let Some(last) = self.sources.len().checked_sub(1) else {
            return Ok(ReadPosition::start_of(0));
        };
        let lines = read_all_lines(&self.sources[last], true)?;
        Ok(match lines.last() {
            Some(line) => ReadPosition::after(last, line),
            None => ReadPosition::start_of(last),
        })
    }

    /// Position of the newest parseable entry, searching files from the last one
    fn newest_entry_position(&self) -> Result<Option<ReadPosition>> {
        for (index, path) in self.sources.iter().enumerate().rev() {
            let name = source_name(path);
            let lines = read_all_lines(path, self.is_last(index))?;
            if let Some(line) = lines
                .iter()
                .rev()
                .find(|line| parse_line(line, &name).is_some())
            {
                return Ok(Some(ReadPosition::at(index, line)));
            }
        }
        Ok(None)
    }

    /// Position just past the entry carrying `cursor`
    fn position_after(&self, cursor: &Cursor) -> Result<Option<ReadPosition>> {
        for (index, path) in self.sources.iter().enumerate() {
            let name = source_name(path);
            for line in read_all_lines(path, self.is_last(index))? {
                // Cheap pre-check before parsing; synthetic cursors never appear in the text
                if !line.text.contains(cursor.as_str()) && !cursor.as_str().starts_with(&name) {
                    continue;
                }
                if let Some(entry) = parse_line(&line, &name) {
                    if entry.cursor == *cursor {
                        return Ok(Some(ReadPosition::after(index, &line)));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Only the last source can still be growing
    fn is_last(&self, source: usize) -> bool {
        source + 1 >= self.sources.len()
    }

    /// Read the next complete line of the current source
    fn read_line(&mut self) -> Result<ReadOutcome> {
        let is_last = self.is_last(self.pos.source);
        let Some(path) = self.sources.get(self.pos.source) else {
            return Ok(ReadOutcome::Eof);
        };

        if self.reader.is_none() {
            let mut file = File::open(path)?;
            file.seek(SeekFrom::Start(self.pos.offset))?;
            self.reader = Some(BufReader::new(file));
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(ReadOutcome::Eof);
        };

        loop {
            let mut buf = Vec::new();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 {
                return Ok(ReadOutcome::Eof);
            }

            let terminated = buf.last() == Some(&b'\n');
            if !terminated && !line_is_complete(&buf, is_last) {
                // Rewind so the line is read whole once the writer finishes it
                reader.seek(SeekFrom::Start(self.pos.offset))?;
                return Ok(ReadOutcome::Incomplete);
            }

            if self.pos.after_unterminated && buf == b"\n" {
                // Newline completing a line that was already read
                self.pos.offset += 1;
                self.pos.after_unterminated = false;
                continue;
            }

            let line = Line {
                start: self.pos.offset,
                end: self.pos.offset + n as u64,
                number: self.pos.line,
                text: String::from_utf8_lossy(&buf).into_owned(),
                terminated,
            };
            self.pos = ReadPosition::after(self.pos.source, &line);
            return Ok(ReadOutcome::Line(line));
        }
    }

    /// Read the next entry without waiting
    fn try_next(&mut self) -> Result<Option<RawEntry>> {
        loop {
            match self.read_line()? {
                ReadOutcome::Line(line) => {
                    let name = source_name(&self.sources[self.pos.source]);
                    if let Some(entry) = parse_line(&line, &name) {
                        return Ok(Some(entry));
                    }
                }
                ReadOutcome::Incomplete => return Ok(None),
                ReadOutcome::Eof => {
                    if self.pos.source + 1 < self.sources.len() {
                        self.set_position(ReadPosition::start_of(self.pos.source + 1));
                    } else {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

impl Journal for ExportJournal {
    fn seek_head(&mut self) -> Result<()> {
        self.set_position(ReadPosition::start_of(0));
        Ok(())
    }

    fn seek_tail(&mut self) -> Result<()> {
        let pos = match self.newest_entry_position()? {
            Some(pos) => pos,
            // Nothing to read yet: wait for the first entry to be appended
            None => self.end_position()?,
        };
        self.set_position(pos);
        Ok(())
    }

    fn seek_cursor(&mut self, cursor: &Cursor) -> Result<()> {
        match self.position_after(cursor)? {
            Some(pos) => {
                self.set_position(pos);
                Ok(())
            }
            None => Err(Error::InvalidCursor(cursor.to_string())),
        }
    }

    fn next_entry(&mut self, timeout: Duration) -> Result<Option<RawEntry>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(entry) = self.try_next()? {
                return Ok(Some(entry));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
            self.refresh_sources()?;
        }
    }
}

fn is_export_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("jsonl")
    )
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Read all complete lines of a file with their byte offsets
fn read_all_lines(path: &Path, is_last: bool) -> Result<Vec<Line>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::new();
    let mut offset = 0u64;
    let mut number = 1u64;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        let terminated = buf.last() == Some(&b'\n');
        if !terminated && !line_is_complete(&buf, is_last) {
            break;
        }
        lines.push(Line {
            start: offset,
            end: offset + n as u64,
            number,
            text: String::from_utf8_lossy(&buf).into_owned(),
            terminated,
        });
        offset += n as u64;
        number += 1;
    }

    Ok(lines)
}

/// Whether a line without its newline can be consumed. Files that were
/// followed by another one are finished; in the last file only a whole JSON
/// object is taken, anything else may still be mid-write.
fn line_is_complete(buf: &[u8], is_last: bool) -> bool {
    !is_last || matches!(serde_json::from_slice::<Value>(buf), Ok(Value::Object(_)))
}

/// Parse one export line into an entry. Blank and non-object lines yield `None`.
fn parse_line(line: &Line, source: &str) -> Option<RawEntry> {
    let text = line.text.trim();
    if text.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(obj)) => {
            Some(entry_from_object(obj, || format!("{}:{}", source, line.number)))
        }
        Ok(_) => {
            warn!(source, line = line.number, "Skipping journal line that is not an object");
            None
        }
        Err(e) => {
            warn!(source, line = line.number, error = %e, "Skipping unparseable journal line");
            None
        }
    }
}

fn entry_from_object(obj: Map<String, Value>, fallback_cursor: impl FnOnce() -> String) -> RawEntry {
    let mut cursor = None;
    let mut realtime_us = None;
    let mut fields = BTreeMap::new();

    for (name, value) in obj {
        match name.as_str() {
            CURSOR_FIELD => cursor = value.as_str().map(str::to_string),
            REALTIME_FIELD => realtime_us = parse_timestamp(&value),
            _ if name.starts_with(ADDRESS_FIELD_PREFIX) => {}
            _ => {
                if let Some(value) = field_value(value) {
                    fields.insert(name, value);
                }
            }
        }
    }

    RawEntry {
        cursor: Cursor::new(cursor.unwrap_or_else(fallback_cursor)),
        realtime_us,
        fields,
    }
}

fn parse_timestamp(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Journal field values are strings, byte arrays for non UTF-8 data, or
/// arrays of those for fields that occur more than once. The first value wins.
fn field_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let is_bytes = !items.is_empty()
                && items
                    .iter()
                    .all(|i| i.as_u64().is_some_and(|b| b <= u8::MAX as u64));
            if is_bytes {
                let bytes: Vec<u8> = items
                    .iter()
                    .filter_map(|i| i.as_u64())
                    .map(|b| b as u8)
                    .collect();
                Some(String::from_utf8_lossy(&bytes).into_owned())
            } else {
                items.into_iter().find_map(field_value)
            }
        }
        Value::Object(_) => Some(value.to_string()),
    }
}
