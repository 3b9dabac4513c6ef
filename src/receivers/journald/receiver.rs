// SPDX-License-Identifier: Apache-2.0

//! Journald receiver implementation
//!
//! Tails the journal, filters and normalizes entries, and forwards batches to a
//! sink. The resume cursor is only persisted after the sink has accepted the
//! batch it covers, so a restart never skips entries.

use crate::receivers::get_meter;
use crate::receivers::journald::backoff::{Backoff, sleep_or_cancel};
use crate::receivers::journald::config::JournaldReceiverConfig;
use crate::receivers::journald::entry::{Cursor, RawEntry, transform};
use crate::receivers::journald::error::{Error, Result};
use crate::receivers::journald::journal::{Journal, JournalOpener};
use crate::receivers::journald::position::{PositionStore, ResumePolicy};
use crate::receivers::journald::sink::{Batch, Sink, SinkError};
use humantime::format_duration;
use opentelemetry::KeyValue;
use opentelemetry::metrics::Counter;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

pub struct JournaldReceiver<O, S> {
    config: JournaldReceiverConfig,
    opener: O,
    sink: S,
}

impl<O, S> JournaldReceiver<O, S>
where
    O: JournalOpener,
    S: Sink,
{
    pub fn new(config: JournaldReceiverConfig, opener: O, sink: S) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        info!(
            tag = config.tag.as_str(),
            path = %config.path.display(),
            read_from_head = config.read_from_head,
            strip_underscores = config.strip_underscores,
            filter_groups = config.filters.groups().len(),
            batch_size = config.batch_size,
            "Journald receiver initialized"
        );

        Ok(Self {
            config,
            opener,
            sink,
        })
    }

    pub async fn start(
        self,
        task_set: &mut JoinSet<std::result::Result<(), BoxError>>,
        receivers_cancel: &CancellationToken,
    ) -> std::result::Result<(), BoxError> {
        let cancel = receivers_cancel.clone();

        info!(path = %self.config.path.display(), "Journald receiver starting");

        task_set.spawn(async move {
            let result = self.run(cancel).await;
            if let Err(ref e) = result {
                error!("Journald receiver error: {}", e);
            }
            result
        });

        Ok(())
    }

    /// Run the tail loop until `cancel` fires or the sink is closed.
    pub async fn run(self, cancel: CancellationToken) -> std::result::Result<(), BoxError> {
        let position =
            PositionStore::from_paths(self.config.pos_file.as_deref(), self.config.storage_path.as_deref());

        let tail = TailLoop {
            backoff: Backoff::new(self.config.backoff),
            config: self.config,
            opener: self.opener,
            sink: self.sink,
            position,
            last_acked: None,
            unsaved: false,
            metrics: ReceiverMetrics::new(),
            cancel,
        };
        tail.run().await
    }
}

/// Metrics counters for the journald receiver
struct ReceiverMetrics {
    accepted: Counter<u64>,
    refused: Counter<u64>,
    filtered: Counter<u64>,
    malformed: Counter<u64>,
    tags: [KeyValue; 1],
}

impl ReceiverMetrics {
    fn new() -> Self {
        Self {
            accepted: get_meter()
                .u64_counter("rotel_receiver_accepted_log_records")
                .with_description(
                    "Number of log records successfully ingested and pushed into the pipeline.",
                )
                .with_unit("log_records")
                .build(),
            refused: get_meter()
                .u64_counter("rotel_receiver_refused_log_records")
                .with_description(
                    "Number of log records that could not be pushed into the pipeline.",
                )
                .with_unit("log_records")
                .build(),
            filtered: get_meter()
                .u64_counter("rotel_receiver_filtered_log_records")
                .with_description("Number of journal entries rejected by the configured filters.")
                .with_unit("log_records")
                .build(),
            malformed: get_meter()
                .u64_counter("rotel_receiver_malformed_log_records")
                .with_description("Number of journal entries dropped because they were malformed.")
                .with_unit("log_records")
                .build(),
            tags: [KeyValue::new("receiver", "journald")],
        }
    }

    fn add_accepted(&self, count: u64) {
        if count > 0 {
            self.accepted.add(count, &self.tags);
        }
    }

    fn add_refused(&self, count: u64) {
        if count > 0 {
            self.refused.add(count, &self.tags);
        }
    }

    fn add_filtered(&self, count: u64) {
        if count > 0 {
            self.filtered.add(count, &self.tags);
        }
    }

    fn add_malformed(&self, count: u64) {
        if count > 0 {
            self.malformed.add(count, &self.tags);
        }
    }
}

/// Outcome of handing a batch to the sink
enum Emitted {
    Accepted,
    /// Shutdown was requested while backing off; the batch was abandoned
    Cancelled,
}

struct TailLoop<O, S> {
    config: JournaldReceiverConfig,
    opener: O,
    sink: S,
    position: PositionStore,
    /// Cursor of the last entry covered by an accepted batch
    last_acked: Option<Cursor>,
    /// Set when saving `last_acked` failed
    unsaved: bool,
    backoff: Backoff,
    metrics: ReceiverMetrics,
    cancel: CancellationToken,
}

impl<O, S> TailLoop<O, S>
where
    O: JournalOpener,
    S: Sink,
{
    async fn run(mut self) -> std::result::Result<(), BoxError> {
        self.last_acked = match self.position.load() {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(
                    position = %self.position.describe(),
                    error = %e,
                    "Failed to load stored cursor, starting without one"
                );
                None
            }
        };

        let mut journal: Option<O::Journal> = None;

        let result = loop {
            if self.cancel.is_cancelled() {
                break Ok(());
            }

            let current = match journal.take() {
                Some(j) => j,
                None => match self.open_and_resume().await {
                    Some(j) => j,
                    None => break Ok(()),
                },
            };

            let batch_size = self.config.batch_size;
            let read_timeout = self.config.read_timeout;
            let read = run_blocking(current, move |j| read_entries(j, batch_size, read_timeout)).await;

            match read {
                Ok((j, Ok(entries))) => {
                    journal = Some(j);
                    if entries.is_empty() {
                        continue;
                    }
                    match self.process_chunk(entries).await {
                        Ok(Emitted::Accepted) => {}
                        Ok(Emitted::Cancelled) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                Ok((_, Err(e))) => {
                    self.reopen_after(e.to_string()).await;
                }
                Err(e) => {
                    self.reopen_after(e.to_string()).await;
                }
            }
        };

        self.shutdown();
        result
    }

    /// Wait before the journal is opened again after a failed read.
    async fn reopen_after(&self, reason: String) {
        let interval = self.config.open_retry_interval;
        warn!(
            error = %reason,
            "Failed to read journal, reopening in {}",
            format_duration(interval)
        );
        sleep_or_cancel(interval, &self.cancel).await;
    }

    /// Open the journal and position it for reading. Retries until it
    /// succeeds; returns None if cancelled first.
    async fn open_and_resume(&self) -> Option<O::Journal> {
        let interval = self.config.open_retry_interval;
        loop {
            match self.opener.open(&self.config.path) {
                Ok(journal) => match self.resume(journal).await {
                    Ok(journal) => return Some(journal),
                    Err(e) => warn!(
                        "Failed to position journal at {}: {} retrying in {}",
                        self.config.path.display(),
                        e,
                        format_duration(interval)
                    ),
                },
                Err(e) => warn!("{} retrying in {}", e, format_duration(interval)),
            }

            if !sleep_or_cancel(interval, &self.cancel).await {
                return None;
            }
        }
    }

    /// Seek to the last acknowledged cursor, or to the configured start.
    async fn resume(&self, journal: O::Journal) -> std::result::Result<O::Journal, BoxError> {
        let from_head = self.config.read_from_head;
        let mut journal = journal;

        let policy = match ResumePolicy::select(self.last_acked.clone(), from_head) {
            ResumePolicy::FromCursor(cursor) => {
                let target = cursor.clone();
                let (j, seeked) = run_blocking(journal, move |j| j.seek_cursor(&target)).await?;
                journal = j;
                match seeked {
                    Ok(()) => {
                        debug!(cursor = cursor.as_str(), "Resumed journal from stored cursor");
                        return Ok(journal);
                    }
                    Err(Error::InvalidCursor(_)) => {
                        warn!(
                            "Could not seek to cursor {} found in pos file: {}, falling back to reading from {}",
                            cursor,
                            self.position.describe(),
                            if from_head { "head" } else { "tail" }
                        );
                        ResumePolicy::cold_start(from_head)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            policy => policy,
        };

        let (journal, seeked) = run_blocking(journal, move |j| match policy {
            ResumePolicy::FromHead => j.seek_head(),
            _ => j.seek_tail(),
        })
        .await?;
        seeked?;

        debug!(
            from = if from_head { "head" } else { "tail" },
            "Reading journal"
        );
        Ok(journal)
    }

    async fn process_chunk(
        &mut self,
        entries: Vec<RawEntry>,
    ) -> std::result::Result<Emitted, BoxError> {
        let Some(last_cursor) = entries.last().map(|e| e.cursor.clone()) else {
            return Ok(Emitted::Accepted);
        };

        let mut batch = Vec::with_capacity(entries.len());
        let mut filtered = 0u64;
        let mut malformed = 0u64;

        for entry in entries {
            if !self.config.filters.accepts(&entry) {
                filtered += 1;
                continue;
            }
            match transform(entry, self.config.strip_underscores, &self.config.tag) {
                Ok(record) => batch.push(record),
                Err(e) => {
                    warn!(error = %e, "Dropping malformed journal entry");
                    malformed += 1;
                }
            }
        }

        self.metrics.add_filtered(filtered);
        self.metrics.add_malformed(malformed);

        if !batch.is_empty() {
            if let Emitted::Cancelled = self.emit(batch).await? {
                return Ok(Emitted::Cancelled);
            }
        }

        self.checkpoint(last_cursor);
        Ok(Emitted::Accepted)
    }

    /// Hand `batch` to the sink, backing off while it overflows.
    async fn emit(&mut self, batch: Batch) -> std::result::Result<Emitted, BoxError> {
        let count = batch.len() as u64;
        let mut batch = batch;

        loop {
            match self.sink.emit(batch) {
                Ok(()) => {
                    self.metrics.add_accepted(count);
                    self.backoff.reset();
                    return Ok(Emitted::Accepted);
                }
                Err(SinkError::Overflow(returned)) => {
                    batch = returned;
                    let delay = self.backoff.next_delay();
                    warn!(
                        records = count,
                        attempt = self.backoff.attempts(),
                        "Sink overflow, retrying batch in {}",
                        format_duration(delay)
                    );
                    if !sleep_or_cancel(delay, &self.cancel).await {
                        self.metrics.add_refused(count);
                        info!(records = count, "Abandoning unacknowledged batch on shutdown");
                        return Ok(Emitted::Cancelled);
                    }
                }
                Err(e @ SinkError::Closed(_)) => {
                    self.metrics.add_refused(count);
                    return Err(format!("Failed to emit journal records: {}", e).into());
                }
            }
        }
    }

    fn checkpoint(&mut self, cursor: Cursor) {
        match self.position.save(&cursor) {
            Ok(()) => self.unsaved = false,
            Err(e) => {
                warn!(
                    position = %self.position.describe(),
                    error = %e,
                    "Failed to save cursor, will retry on next checkpoint"
                );
                self.unsaved = true;
            }
        }
        self.last_acked = Some(cursor);
    }

    fn shutdown(&mut self) {
        if self.unsaved {
            if let Some(cursor) = self.last_acked.as_ref() {
                if let Err(e) = self.position.save(cursor) {
                    warn!(
                        position = %self.position.describe(),
                        error = %e,
                        "Failed to save cursor on shutdown"
                    );
                }
            }
        }
        info!("Journald receiver stopped");
    }
}

/// Run a blocking journal operation off the async runtime, handing the
/// journal back to the caller afterwards.
async fn run_blocking<J, T, F>(journal: J, f: F) -> std::result::Result<(J, Result<T>), BoxError>
where
    J: Journal + 'static,
    T: Send + 'static,
    F: FnOnce(&mut J) -> Result<T> + Send + 'static,
{
    let mut journal = journal;
    tokio::task::spawn_blocking(move || {
        let result = f(&mut journal);
        (journal, result)
    })
    .await
    .map_err(|e| -> BoxError { format!("Journal task failed: {}", e).into() })
}

/// Read up to `max` entries. Only the first read waits for new data.
fn read_entries<J: Journal>(journal: &mut J, max: usize, timeout: Duration) -> Result<Vec<RawEntry>> {
    let mut entries = Vec::new();
    let Some(first) = journal.next_entry(timeout)? else {
        return Ok(entries);
    };
    entries.push(first);

    while entries.len() < max {
        match journal.next_entry(Duration::ZERO)? {
            Some(entry) => entries.push(entry),
            None => break,
        }
    }
    Ok(entries)
}
