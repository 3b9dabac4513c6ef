// SPDX-License-Identifier: Apache-2.0

use crate::receivers::journald::filter::{FilterGroup, FilterSet};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tower::BoxError;

/// Parse a human readable duration such as `250ms` or `1s`
pub fn parse_duration(s: &str) -> Result<Duration, BoxError> {
    humantime::parse_duration(s.trim())
        .map_err(|e| format!("invalid duration `{}`: {}", s, e).into())
}

/// Parse filters given as JSON, e.g. `[{"_SYSTEMD_UNIT":"sshd.service"}]`
pub fn parse_filters(s: &str) -> Result<FilterSet, BoxError> {
    FilterSet::from_json(s).map_err(|e| format!("invalid filters `{}`: {}", s, e).into())
}

// Support deser into a string from multiple value types. This allows a string
// environment variable to have a value that is a number or bool
pub(crate) fn deser_into_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(num) => Ok(num.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        serde_json::Value::String(s) => Ok(s),
        _ => Err(serde::de::Error::custom(
            "unexpected value for string parameter",
        )),
    }
}

pub(crate) fn deser_into_string_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(deser_into_string(deserializer)?))
}

pub(crate) fn deser_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(None),
        // bare numbers are milliseconds
        serde_json::Value::Number(num) => num
            .as_u64()
            .map(|ms| Some(Duration::from_millis(ms)))
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {}", num))),
        serde_json::Value::String(s) => parse_duration(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Err(serde::de::Error::custom(
            "unexpected value for duration parameter",
        )),
    }
}

// Filters may come from a config file as a JSON array or from the environment
// as a JSON string. Env values can arrive partially parsed, with each group
// still a string.
pub(crate) fn deser_filters_opt<'de, D>(deserializer: D) -> Result<Option<FilterSet>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => parse_filters(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        serde_json::Value::Array(items) => {
            let groups = items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => serde_json::from_str::<FilterGroup>(&s),
                    other => serde_json::from_value::<FilterGroup>(other),
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(serde::de::Error::custom)?;
            Ok(Some(FilterSet::new(groups)))
        }
        _ => Err(serde::de::Error::custom(
            "unexpected value for filters parameter",
        )),
    }
}
