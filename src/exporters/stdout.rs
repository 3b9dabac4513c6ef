// SPDX-License-Identifier: Apache-2.0

//! Writes received batches as JSON lines.

use crate::bounded_channel::BoundedReceiver;
use crate::init::args::ExporterFormat;
use crate::receivers::journald::convert::convert_to_otlp_logs;
use crate::receivers::journald::sink::Batch;
use std::io::Write;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::debug;

pub struct StdoutExporter {
    rx: BoundedReceiver<Batch>,
    format: ExporterFormat,
    writer: Box<dyn Write + Send>,
}

impl StdoutExporter {
    pub fn new(rx: BoundedReceiver<Batch>, format: ExporterFormat) -> Self {
        Self::with_writer(rx, format, Box::new(std::io::stdout()))
    }

    pub fn with_writer(
        rx: BoundedReceiver<Batch>,
        format: ExporterFormat,
        writer: Box<dyn Write + Send>,
    ) -> Self {
        StdoutExporter { rx, format, writer }
    }

    /// Export batches until the channel closes. On cancellation, batches
    /// already queued are still written.
    pub async fn start(&mut self, cancel_token: CancellationToken) -> Result<(), BoxError> {
        loop {
            select! {
                m = self.rx.next() => match m {
                    Some(batch) => self.export(batch).await?,
                    None => break,
                },
                _ = cancel_token.cancelled() => {
                    while let Some(batch) = self.rx.try_recv() {
                        self.export(batch).await?;
                    }
                    break;
                }
            }
        }
        debug!("exiting stdout exporter");
        Ok(())
    }

    /// Write a batch on the blocking pool, handing the writer back afterwards.
    async fn export(&mut self, batch: Batch) -> Result<(), BoxError> {
        let format = self.format;
        let mut writer = std::mem::replace(&mut self.writer, Box::new(std::io::sink()));
        let (writer, res) = tokio::task::spawn_blocking(move || {
            let res = write_batch(&mut writer, format, batch);
            (writer, res)
        })
        .await?;
        self.writer = writer;
        res
    }
}

fn write_batch(writer: &mut dyn Write, format: ExporterFormat, batch: Batch) -> Result<(), BoxError> {
    match format {
        ExporterFormat::Records => {
            for record in &batch {
                serde_json::to_writer(&mut *writer, record)?;
                writer.write_all(b"\n")?;
            }
        }
        ExporterFormat::Otlp => {
            let resource_logs = convert_to_otlp_logs(batch);
            serde_json::to_writer(&mut *writer, &resource_logs)?;
            writer.write_all(b"\n")?;
        }
    }
    writer.flush()?;
    Ok(())
}
