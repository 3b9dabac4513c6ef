// SPDX-License-Identifier: Apache-2.0

use crate::init::journald_receiver::JournaldReceiverArgs;
use clap::{Args, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    /// JSON config file for the journald receiver
    #[arg(long, env = "ROTEL_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Output format of the stdout exporter
    #[arg(
        value_enum,
        long,
        env = "ROTEL_EXPORTER_FORMAT",
        default_value = "records"
    )]
    pub exporter_format: ExporterFormat,

    /// Number of batches that may queue between the receiver and the exporter
    #[arg(long, env = "ROTEL_SENDING_QUEUE_SIZE", default_value = "1000")]
    pub sending_queue_size: usize,

    #[command(flatten)]
    pub journald_receiver: JournaldReceiverArgs,
}

impl Default for AgentRun {
    fn default() -> Self {
        AgentRun {
            config: None,
            exporter_format: ExporterFormat::Records,
            sending_queue_size: 1_000,
            journald_receiver: JournaldReceiverArgs::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ExporterFormat {
    /// One JSON object per record: {"tag", "time", "record"}
    #[default]
    Records,
    /// One OTLP ResourceLogs JSON object per batch
    Otlp,
}
