// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use crate::receivers::journald::backoff::BackoffConfig;
use crate::receivers::journald::filter::FilterSet;

/// Default journal location
pub const DEFAULT_JOURNAL_PATH: &str = "/var/log/journal";

/// Default maximum number of records per emitted batch
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default bounded wait of a single journal read (milliseconds)
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 250;

/// Minimum allowed read timeout (milliseconds)
pub const MIN_READ_TIMEOUT_MS: u64 = 10;

/// Default interval between attempts to open a missing journal
pub const DEFAULT_OPEN_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Default first delay after the sink reports overflow (milliseconds)
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 100;

/// Default cap of the overflow backoff (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 10_000;

/// Configuration for the journald receiver
#[derive(Debug, Clone)]
pub struct JournaldReceiverConfig {
    /// Tag attached to every emitted record. Required.
    pub tag: String,

    /// Journal location (file or directory)
    pub path: PathBuf,

    /// Start from the oldest entry when no cursor is stored. Otherwise
    /// start from the newest.
    pub read_from_head: bool,

    /// Plain text file holding the last acknowledged cursor
    pub pos_file: Option<PathBuf>,

    /// JSON storage file holding the cursor under the `journal` key
    pub storage_path: Option<PathBuf>,

    /// Remove one leading underscore from field names
    pub strip_underscores: bool,

    pub filters: FilterSet,

    pub batch_size: usize,

    pub read_timeout: Duration,

    pub open_retry_interval: Duration,

    pub backoff: BackoffConfig,
}

impl Default for JournaldReceiverConfig {
    fn default() -> Self {
        Self {
            tag: String::new(),
            path: PathBuf::from(DEFAULT_JOURNAL_PATH),
            read_from_head: false,
            pos_file: None,
            storage_path: None,
            strip_underscores: false,
            filters: FilterSet::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            open_retry_interval: DEFAULT_OPEN_RETRY_INTERVAL,
            backoff: BackoffConfig {
                initial_backoff: Duration::from_millis(DEFAULT_BACKOFF_INITIAL_MS),
                max_backoff: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            },
        }
    }
}

impl JournaldReceiverConfig {
    /// Create a new config for `tag` reading the journal at `path`
    pub fn new(tag: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            tag: tag.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.tag.trim().is_empty() {
            return Err("'tag' parameter is required".to_string());
        }

        if self.pos_file.is_some() && self.storage_path.is_some() {
            return Err("Only one of 'pos_file' and 'storage_path' may be set".to_string());
        }

        if self.batch_size == 0 {
            return Err("Batch size must be at least 1, got 0".to_string());
        }

        if self.read_timeout < Duration::from_millis(MIN_READ_TIMEOUT_MS) {
            return Err(format!(
                "Read timeout must be at least {}ms, got {}ms",
                MIN_READ_TIMEOUT_MS,
                self.read_timeout.as_millis()
            ));
        }

        if self.open_retry_interval.is_zero() {
            return Err("Open retry interval must be greater than zero".to_string());
        }

        if self.backoff.initial_backoff.is_zero() {
            return Err("Initial backoff must be greater than zero".to_string());
        }

        if self.backoff.max_backoff < self.backoff.initial_backoff {
            return Err(format!(
                "Max backoff ({}ms) must not be less than initial backoff ({}ms)",
                self.backoff.max_backoff.as_millis(),
                self.backoff.initial_backoff.as_millis()
            ));
        }

        Ok(())
    }

    pub fn with_read_from_head(mut self, read_from_head: bool) -> Self {
        self.read_from_head = read_from_head;
        self
    }

    pub fn with_pos_file(mut self, pos_file: impl Into<PathBuf>) -> Self {
        self.pos_file = Some(pos_file.into());
        self
    }

    pub fn with_storage_path(mut self, storage_path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(storage_path.into());
        self
    }

    pub fn with_strip_underscores(mut self, strip_underscores: bool) -> Self {
        self.strip_underscores = strip_underscores;
        self
    }

    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    /// Set custom batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_open_retry_interval(mut self, interval: Duration) -> Self {
        self.open_retry_interval = interval;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff = BackoffConfig {
            initial_backoff: initial,
            max_backoff: max,
        };
        self
    }
}
