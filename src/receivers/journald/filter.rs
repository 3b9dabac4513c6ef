// SPDX-License-Identifier: Apache-2.0

//! Field predicates applied to raw entries before transformation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::receivers::journald::entry::RawEntry;

/// Expected value for one field: a single value or any of several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    One(String),
    AnyOf(Vec<String>),
}

impl FilterValue {
    fn matches(&self, actual: &str) -> bool {
        match self {
            FilterValue::One(v) => v == actual,
            FilterValue::AnyOf(vs) => vs.iter().any(|v| v == actual),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::One(s.to_string())
    }
}

/// One predicate group: every field must be present and match.
pub type FilterGroup = BTreeMap<String, FilterValue>;

/// A set of predicate groups. An entry is accepted when the set is empty or
/// when at least one group is fully satisfied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSet {
    groups: Vec<FilterGroup>,
}

impl FilterSet {
    pub fn new(groups: Vec<FilterGroup>) -> Self {
        Self { groups }
    }

    /// Parse the JSON form used in configuration, e.g.
    /// `[{"_SYSTEMD_UNIT": "systemd-journald.service"}]`
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &[FilterGroup] {
        &self.groups
    }

    pub fn accepts(&self, entry: &RawEntry) -> bool {
        if self.groups.is_empty() {
            return true;
        }

        self.groups.iter().any(|group| {
            group
                .iter()
                .all(|(field, expected)| entry.field(field).is_some_and(|v| expected.matches(v)))
        })
    }
}
