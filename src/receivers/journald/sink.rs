// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use crate::bounded_channel::{BoundedSender, TrySendError};
use crate::receivers::journald::entry::OutputRecord;

/// Records handed to the sink in one emission
pub type Batch = Vec<OutputRecord>;

/// Rejection from a sink. The batch is handed back untouched.
#[derive(Debug, PartialEq)]
pub enum SinkError {
    /// Temporarily saturated, retry the same batch later
    Overflow(Batch),
    /// Downstream is gone, nothing will ever be accepted again
    Closed(Batch),
}

impl SinkError {
    pub fn into_batch(self) -> Batch {
        match self {
            SinkError::Overflow(batch) | SinkError::Closed(batch) => batch,
        }
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Overflow(batch) => write!(f, "sink overflow ({} records)", batch.len()),
            SinkError::Closed(batch) => write!(f, "sink closed ({} records)", batch.len()),
        }
    }
}

impl std::error::Error for SinkError {}

/// Downstream consumer of record batches.
///
/// `emit` must not block: a saturated consumer reports `Overflow` and the
/// caller decides when to retry.
pub trait Sink: Send + Sync + 'static {
    fn emit(&self, batch: Batch) -> Result<(), SinkError>;
}

/// Sink that forwards batches over a bounded channel
#[derive(Clone)]
pub struct ChannelSink {
    tx: BoundedSender<Batch>,
}

impl ChannelSink {
    pub fn new(tx: BoundedSender<Batch>) -> Self {
        Self { tx }
    }
}

impl Sink for ChannelSink {
    fn emit(&self, batch: Batch) -> Result<(), SinkError> {
        self.tx.try_send(batch).map_err(|e| match e {
            TrySendError::Full(batch) => SinkError::Overflow(batch),
            TrySendError::Disconnected(batch) => SinkError::Closed(batch),
        })
    }
}
