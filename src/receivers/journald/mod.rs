// SPDX-License-Identifier: Apache-2.0

//! Systemd journal (journald) receiver
//!
//! Tails the journal and forwards each entry as a normalized record: a fixed
//! tag, the entry's realtime timestamp in seconds, and its fields. The
//! position of the last forwarded entry is kept in a pos file or JSON storage
//! file so a restart resumes where the previous run stopped.
//!
//! Journal access goes through the [`journal::Journal`] trait.
//! [`export::ExportJournal`] reads the JSON export format written by
//! `journalctl -o json`.

pub mod backoff;
pub mod config;
pub mod convert;
pub mod entry;
pub mod error;
pub mod export;
pub mod filter;
pub mod journal;
pub mod persistence;
pub mod position;
pub mod receiver;
pub mod sink;

pub use config::JournaldReceiverConfig;
pub use entry::{Cursor, OutputRecord, RawEntry};
pub use error::{Error, Result};
pub use export::ExportJournalOpener;
pub use filter::FilterSet;
pub use receiver::JournaldReceiver;
pub use sink::{Batch, ChannelSink, Sink, SinkError};
