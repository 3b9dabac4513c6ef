// SPDX-License-Identifier: Apache-2.0

//! Journal entries and the records emitted for them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::receivers::journald::error::{Error, Result};

const MICROS_PER_SEC: u64 = 1_000_000;

/// Opaque position token into the journal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Cursor {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Cursor {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A journal entry as read, before filtering and transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Position of this entry
    pub cursor: Cursor,
    /// Realtime timestamp in microseconds since the epoch, if the entry had one
    pub realtime_us: Option<u64>,
    /// Data fields, keyed by their journal names (private fields start with `_`)
    pub fields: BTreeMap<String, String>,
}

impl RawEntry {
    pub fn new(cursor: impl Into<Cursor>, realtime_us: Option<u64>) -> Self {
        Self {
            cursor: cursor.into(),
            realtime_us,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Realtime timestamp truncated to whole seconds
    pub fn realtime_secs(&self) -> Option<u64> {
        self.realtime_us.map(|us| us / MICROS_PER_SEC)
    }
}

/// A normalized record handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub tag: String,
    pub time: u64,
    pub record: BTreeMap<String, String>,
}

/// Convert a raw entry into an output record.
///
/// With `strip_underscores`, a field name starting with `_` loses exactly that
/// first character; nothing else is renamed, added or dropped. Entries without
/// a realtime timestamp are rejected as malformed.
pub fn transform(entry: RawEntry, strip_underscores: bool, tag: &str) -> Result<OutputRecord> {
    let Some(time) = entry.realtime_secs() else {
        return Err(Error::MalformedEntry {
            cursor: entry.cursor.into_inner(),
            reason: "missing realtime timestamp".to_string(),
        });
    };

    let record = if strip_underscores {
        entry
            .fields
            .into_iter()
            .map(|(name, value)| (strip_leading_underscore(name), value))
            .collect()
    } else {
        entry.fields
    };

    Ok(OutputRecord {
        tag: tag.to_string(),
        time,
        record,
    })
}

fn strip_leading_underscore(mut name: String) -> String {
    if name.starts_with('_') {
        name.remove(0);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_entry() -> RawEntry {
        RawEntry::new("s=abc;i=1cd", Some(1_364_519_243_569_810))
            .with_field("_UID", "0")
            .with_field("_HOSTNAME", "arch")
            .with_field("PRIORITY", "5")
            .with_field("MESSAGE", "ROOT LOGIN ON tty1")
            .with_field("_SOURCE_REALTIME_TIMESTAMP", "1364519243563178")
    }

    #[test]
    fn test_transform_keeps_names_without_stripping() {
        let entry = login_entry();
        let names: Vec<String> = entry.fields.keys().cloned().collect();

        let record = transform(entry, false, "test").unwrap();
        assert_eq!(record.tag, "test");
        assert_eq!(record.time, 1_364_519_243);
        assert_eq!(record.record.keys().cloned().collect::<Vec<_>>(), names);
        assert_eq!(record.record.get("_UID").map(String::as_str), Some("0"));
    }

    #[test]
    fn test_transform_strips_one_leading_underscore() {
        let record = transform(login_entry(), true, "test").unwrap();

        assert_eq!(record.record.get("UID").map(String::as_str), Some("0"));
        assert_eq!(record.record.get("HOSTNAME").map(String::as_str), Some("arch"));
        assert_eq!(record.record.get("PRIORITY").map(String::as_str), Some("5"));
        assert_eq!(
            record
                .record
                .get("SOURCE_REALTIME_TIMESTAMP")
                .map(String::as_str),
            Some("1364519243563178")
        );
        assert!(!record.record.keys().any(|k| k.starts_with('_')));
        assert_eq!(record.record.len(), 5);
    }

    #[test]
    fn test_transform_strips_only_the_first_underscore() {
        let entry = RawEntry::new("c", Some(1_000_000))
            .with_field("__DOUBLE", "x")
            .with_field("_", "bare")
            .with_field("MID_DLE_", "y");

        let record = transform(entry, true, "t").unwrap();
        assert_eq!(record.record.get("_DOUBLE").map(String::as_str), Some("x"));
        assert_eq!(record.record.get("").map(String::as_str), Some("bare"));
        assert_eq!(record.record.get("MID_DLE_").map(String::as_str), Some("y"));
    }

    #[test]
    fn test_transform_rejects_missing_timestamp() {
        let entry = RawEntry::new("s=abc;i=2", None).with_field("MESSAGE", "hello");
        match transform(entry, false, "test") {
            Err(Error::MalformedEntry { cursor, .. }) => assert_eq!(cursor, "s=abc;i=2"),
            other => panic!("expected malformed entry, got {:?}", other),
        }
    }

    #[test]
    fn test_record_serializes_as_tag_time_record() {
        let record = transform(login_entry(), false, "test").unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["tag"], "test");
        assert_eq!(json["time"], 1_364_519_243u64);
        assert_eq!(json["record"]["MESSAGE"], "ROOT LOGIN ON tty1");
    }
}
