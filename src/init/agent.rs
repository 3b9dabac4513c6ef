// SPDX-License-Identifier: Apache-2.0

use crate::bounded_channel::bounded;
use crate::exporters::stdout::StdoutExporter;
use crate::init::args::AgentRun;
use crate::init::config::get_receiver_args;
use crate::init::wait;
use crate::receivers::journald::{ChannelSink, ExportJournalOpener, JournaldReceiver};
use crate::telemetry::internal_exporter::{MetricsSnapshot, install_meter_provider};
use std::time::Duration;
use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

const RECEIVER_EXIT_TIMEOUT: Duration = Duration::from_secs(2);
const EXPORTER_EXIT_TIMEOUT: Duration = Duration::from_millis(500);

pub struct Agent {
    config: Box<AgentRun>,
}

impl Agent {
    pub fn new(config: Box<AgentRun>) -> Self {
        Self { config }
    }

    pub async fn run(self, agent_cancel: CancellationToken) -> Result<(), BoxError> {
        let config = self.config;

        info!("Starting rotel-journald.");

        let receiver_args = get_receiver_args(&config)?;
        let receiver_config = receiver_args.build_config();

        // The meter provider must be in place before the receiver builds its counters
        let metrics = MetricsSnapshot::default();
        let meter_provider = install_meter_provider(metrics.clone());

        let mut receivers_task_set = JoinSet::new();
        let mut exporters_task_set = JoinSet::new();

        let receivers_cancel = CancellationToken::new();
        let exporters_cancel = CancellationToken::new();

        let (logs_tx, logs_rx) = bounded(config.sending_queue_size.max(1));

        let mut exporter = StdoutExporter::new(logs_rx, config.exporter_format);
        {
            let token = exporters_cancel.clone();
            exporters_task_set.spawn(async move {
                let res = exporter.start(token).await;
                if let Err(e) = &res {
                    error!(error = %e, "Stdout exporter returned from run loop with error.");
                }
                res
            });
        }

        let receiver = JournaldReceiver::new(
            receiver_config,
            ExportJournalOpener::default(),
            ChannelSink::new(logs_tx),
        )?;
        receiver
            .start(&mut receivers_task_set, &receivers_cancel)
            .await?;

        let mut result = Ok(());
        select! {
            _ = agent_cancel.cancelled() => {
                debug!("Agent cancellation signaled.");
            },
            e = wait::wait_for_any_task(&mut receivers_task_set) => {
                match e {
                    Ok(()) => info!("Unexpected early exit of receiver."),
                    Err(e) => result = Err(e),
                }
            },
            e = wait::wait_for_any_task(&mut exporters_task_set) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of exporter."),
                    Err(e) => result = Err(e),
                }
            }
        }

        // Stop the receiver first so its last acknowledged cursor is saved,
        // then let the exporter drain what was already handed over.
        receivers_cancel.cancel();
        let res = wait::wait_for_tasks_with_timeout(&mut receivers_task_set, RECEIVER_EXIT_TIMEOUT)
            .await;
        if let Err(e) = res {
            if result.is_ok() {
                result = Err(format!("timed out waiting for receiver exit: {}", e).into());
            }
        }

        exporters_cancel.cancel();
        let res =
            wait::wait_for_tasks_with_timeout(&mut exporters_task_set, EXPORTER_EXIT_TIMEOUT).await;
        if let Err(e) = res {
            if result.is_ok() {
                result = Err(format!("timed out waiting for exporter exit: {}", e).into());
            }
        }

        // Shutdown runs a final collection
        if let Err(e) = meter_provider.shutdown() {
            warn!(error = %e, "Failed to shut down meter provider.");
        }
        info!(metrics = ?metrics.values(), "Journald receiver metrics.");

        result
    }
}
