// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Journal unavailable at {path}: {reason}")]
    JournalUnavailable { path: PathBuf, reason: String },

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Malformed entry at {cursor}: {reason}")]
    MalformedEntry { cursor: String, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
