// SPDX-License-Identifier: Apache-2.0

//! Exporter for the agent's own metrics.
//!
//! Keeps the latest cumulative value of every counter so the agent can report
//! them, and logs each collection at debug level.

use opentelemetry::global;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::metrics::v1::{metric, number_data_point};
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::metrics::data::ResourceMetrics;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider, Temporality};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

const COLLECT_INTERVAL: Duration = Duration::from_secs(10);

/// Latest cumulative value per metric name, summed over attribute sets
#[derive(Clone, Debug, Default)]
pub struct MetricsSnapshot {
    values: Arc<Mutex<BTreeMap<String, i64>>>,
}

impl MetricsSnapshot {
    pub fn get(&self, name: &str) -> Option<i64> {
        self.values.lock().ok()?.get(name).copied()
    }

    pub fn values(&self) -> BTreeMap<String, i64> {
        self.values
            .lock()
            .map(|values| values.clone())
            .unwrap_or_default()
    }

    fn update(&self, name: String, value: i64) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(name, value);
        }
    }
}

pub struct InternalMetricsExporter {
    snapshot: MetricsSnapshot,
}

impl InternalMetricsExporter {
    pub fn new(snapshot: MetricsSnapshot) -> Self {
        Self { snapshot }
    }

    fn record(&self, metrics: &ResourceMetrics) {
        let req = ExportMetricsServiceRequest::from(metrics);
        for resource_metrics in req.resource_metrics {
            for scope_metrics in resource_metrics.scope_metrics {
                for m in scope_metrics.metrics {
                    let Some(metric::Data::Sum(sum)) = m.data else {
                        continue;
                    };
                    let total: i64 = sum
                        .data_points
                        .iter()
                        .map(|dp| match dp.value {
                            Some(number_data_point::Value::AsInt(i)) => i,
                            Some(number_data_point::Value::AsDouble(d)) => d as i64,
                            None => 0,
                        })
                        .sum();
                    debug!(metric = m.name.as_str(), value = total, "Collected internal metric");
                    self.snapshot.update(m.name, total);
                }
            }
        }
    }
}

impl PushMetricExporter for InternalMetricsExporter {
    fn export(&self, metrics: &mut ResourceMetrics) -> impl Future<Output = OTelSdkResult> + Send {
        self.record(metrics);
        std::future::ready(Ok(()))
    }

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown(&self) -> OTelSdkResult {
        Ok(())
    }

    fn temporality(&self) -> Temporality {
        Temporality::Cumulative
    }
}

/// Install a global meter provider that feeds `snapshot`. Must run before any
/// receiver creates its instruments.
pub fn install_meter_provider(snapshot: MetricsSnapshot) -> SdkMeterProvider {
    let reader = PeriodicReader::builder(InternalMetricsExporter::new(snapshot))
        .with_interval(COLLECT_INTERVAL)
        .build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider.clone());
    provider
}
