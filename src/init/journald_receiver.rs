// SPDX-License-Identifier: Apache-2.0

use crate::init::parse;
use crate::receivers::journald::config::JournaldReceiverConfig;
use crate::receivers::journald::filter::FilterSet;
use clap::Args;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Journald receiver arguments.
///
/// On the command line every option carries the `journald-receiver-` prefix.
/// In a config file (or `ROTEL_JOURNALD_RECEIVER_*` variables read through it)
/// the keys are the bare names, e.g. `tag`, `pos_file`, `filters`.
#[derive(Debug, Args, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JournaldReceiverArgs {
    /// Tag attached to every record (required)
    #[arg(long, env = "ROTEL_JOURNALD_RECEIVER_TAG")]
    #[serde(rename = "tag", deserialize_with = "parse::deser_into_string_opt")]
    pub journald_receiver_tag: Option<String>,

    /// Journal location, a journal export file or a directory of them (default: /var/log/journal)
    #[arg(long, env = "ROTEL_JOURNALD_RECEIVER_PATH")]
    #[serde(rename = "path")]
    pub journald_receiver_path: Option<PathBuf>,

    /// Read from the oldest entry when no position is stored
    #[arg(
        long,
        env = "ROTEL_JOURNALD_RECEIVER_READ_FROM_HEAD",
        default_value = "false"
    )]
    #[serde(rename = "read_from_head")]
    pub journald_receiver_read_from_head: bool,

    /// File holding the cursor of the last forwarded entry
    #[arg(long, env = "ROTEL_JOURNALD_RECEIVER_POS_FILE")]
    #[serde(rename = "pos_file")]
    pub journald_receiver_pos_file: Option<PathBuf>,

    /// JSON storage file holding the cursor under the "journal" key
    #[arg(long, env = "ROTEL_JOURNALD_RECEIVER_STORAGE_PATH")]
    #[serde(rename = "storage_path")]
    pub journald_receiver_storage_path: Option<PathBuf>,

    /// Remove one leading underscore from field names
    #[arg(
        long,
        env = "ROTEL_JOURNALD_RECEIVER_STRIP_UNDERSCORES",
        default_value = "false"
    )]
    #[serde(rename = "strip_underscores")]
    pub journald_receiver_strip_underscores: bool,

    /// Filters as JSON, a list of {field: value} groups, e.g. '[{"_SYSTEMD_UNIT":"sshd.service"}]'
    #[arg(long, env = "ROTEL_JOURNALD_RECEIVER_FILTERS", value_parser = parse::parse_filters)]
    #[serde(rename = "filters", deserialize_with = "parse::deser_filters_opt")]
    pub journald_receiver_filters: Option<FilterSet>,

    /// Maximum number of records per batch (default: 100)
    #[arg(long, env = "ROTEL_JOURNALD_RECEIVER_BATCH_SIZE")]
    #[serde(rename = "batch_size")]
    pub journald_receiver_batch_size: Option<usize>,

    /// Maximum wait of a single journal read (default: 250ms)
    #[arg(long, env = "ROTEL_JOURNALD_RECEIVER_READ_TIMEOUT", value_parser = parse::parse_duration)]
    #[serde(rename = "read_timeout", deserialize_with = "parse::deser_duration_opt")]
    pub journald_receiver_read_timeout: Option<Duration>,

    /// Interval between attempts to open a missing journal (default: 1s)
    #[arg(long, env = "ROTEL_JOURNALD_RECEIVER_OPEN_RETRY_INTERVAL", value_parser = parse::parse_duration)]
    #[serde(
        rename = "open_retry_interval",
        deserialize_with = "parse::deser_duration_opt"
    )]
    pub journald_receiver_open_retry_interval: Option<Duration>,

    /// First retry delay when the downstream is full (default: 100ms)
    #[arg(long, env = "ROTEL_JOURNALD_RECEIVER_BACKOFF_INITIAL", value_parser = parse::parse_duration)]
    #[serde(rename = "backoff_initial", deserialize_with = "parse::deser_duration_opt")]
    pub journald_receiver_backoff_initial: Option<Duration>,

    /// Maximum retry delay when the downstream is full (default: 10s)
    #[arg(long, env = "ROTEL_JOURNALD_RECEIVER_BACKOFF_MAX", value_parser = parse::parse_duration)]
    #[serde(rename = "backoff_max", deserialize_with = "parse::deser_duration_opt")]
    pub journald_receiver_backoff_max: Option<Duration>,
}

impl JournaldReceiverArgs {
    /// Layer `self` over `base`: values set here win, unset ones fall back to `base`.
    pub fn or(self, base: JournaldReceiverArgs) -> JournaldReceiverArgs {
        JournaldReceiverArgs {
            journald_receiver_tag: self.journald_receiver_tag.or(base.journald_receiver_tag),
            journald_receiver_path: self.journald_receiver_path.or(base.journald_receiver_path),
            journald_receiver_read_from_head: self.journald_receiver_read_from_head
                || base.journald_receiver_read_from_head,
            journald_receiver_pos_file: self
                .journald_receiver_pos_file
                .or(base.journald_receiver_pos_file),
            journald_receiver_storage_path: self
                .journald_receiver_storage_path
                .or(base.journald_receiver_storage_path),
            journald_receiver_strip_underscores: self.journald_receiver_strip_underscores
                || base.journald_receiver_strip_underscores,
            journald_receiver_filters: self
                .journald_receiver_filters
                .or(base.journald_receiver_filters),
            journald_receiver_batch_size: self
                .journald_receiver_batch_size
                .or(base.journald_receiver_batch_size),
            journald_receiver_read_timeout: self
                .journald_receiver_read_timeout
                .or(base.journald_receiver_read_timeout),
            journald_receiver_open_retry_interval: self
                .journald_receiver_open_retry_interval
                .or(base.journald_receiver_open_retry_interval),
            journald_receiver_backoff_initial: self
                .journald_receiver_backoff_initial
                .or(base.journald_receiver_backoff_initial),
            journald_receiver_backoff_max: self
                .journald_receiver_backoff_max
                .or(base.journald_receiver_backoff_max),
        }
    }

    /// Build the receiver config. Validation happens when the receiver is created.
    pub fn build_config(&self) -> JournaldReceiverConfig {
        let mut config = JournaldReceiverConfig {
            tag: self.journald_receiver_tag.clone().unwrap_or_default(),
            read_from_head: self.journald_receiver_read_from_head,
            pos_file: self.journald_receiver_pos_file.clone(),
            storage_path: self.journald_receiver_storage_path.clone(),
            strip_underscores: self.journald_receiver_strip_underscores,
            filters: self.journald_receiver_filters.clone().unwrap_or_default(),
            ..Default::default()
        };

        if let Some(path) = &self.journald_receiver_path {
            config.path = path.clone();
        }
        if let Some(batch_size) = self.journald_receiver_batch_size {
            config = config.with_batch_size(batch_size);
        }
        if let Some(read_timeout) = self.journald_receiver_read_timeout {
            config = config.with_read_timeout(read_timeout);
        }
        if let Some(interval) = self.journald_receiver_open_retry_interval {
            config = config.with_open_retry_interval(interval);
        }
        if let Some(initial) = self.journald_receiver_backoff_initial {
            config.backoff.initial_backoff = initial;
        }
        if let Some(max) = self.journald_receiver_backoff_max {
            config.backoff.max_backoff = max;
        }

        config
    }
}
