// SPDX-License-Identifier: Apache-2.0

//! Convert journald output records to OTLP log records

use crate::receivers::journald::entry::OutputRecord;
use gethostname::gethostname;
use opentelemetry_proto::tonic::common::v1::{AnyValue, InstrumentationScope, KeyValue, any_value};
use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::resource::v1::Resource;
use std::time::{SystemTime, UNIX_EPOCH};

const NANOS_PER_SEC: u64 = 1_000_000_000;

// Journal fields with special meaning
const MESSAGE_FIELD: &str = "MESSAGE";
const PRIORITY_FIELD: &str = "PRIORITY";

// Log record attributes
const JOURNALD_TAG_KEY: &str = "journald.tag";

// Resource attributes
const LOG_SOURCE_KEY: &str = "log.source";
const LOG_SOURCE_VALUE: &str = "journald";
const HOST_NAME_KEY: &str = "host.name";
const OS_TYPE_KEY: &str = "os.type";
const OS_TYPE_VALUE: &str = "linux";

const SCOPE_NAME: &str = "journald";

/// Syslog priority level as carried in the journal's PRIORITY field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl Priority {
    /// Parse a PRIORITY field value. Anything outside 0-7 is not a priority.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "0" => Some(Priority::Emergency),
            "1" => Some(Priority::Alert),
            "2" => Some(Priority::Critical),
            "3" => Some(Priority::Error),
            "4" => Some(Priority::Warning),
            "5" => Some(Priority::Notice),
            "6" => Some(Priority::Info),
            "7" => Some(Priority::Debug),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Emergency => "EMERGENCY",
            Priority::Alert => "ALERT",
            Priority::Critical => "CRITICAL",
            Priority::Error => "ERROR",
            Priority::Warning => "WARNING",
            Priority::Notice => "NOTICE",
            Priority::Info => "INFO",
            Priority::Debug => "DEBUG",
        }
    }

    /// See: https://opentelemetry.io/docs/specs/otel/logs/data-model/#field-severitynumber
    pub fn to_otel_severity_number(&self) -> i32 {
        match self {
            Priority::Emergency => 21, // FATAL
            Priority::Alert => 21,     // FATAL
            Priority::Critical => 21,  // FATAL
            Priority::Error => 17,     // ERROR
            Priority::Warning => 13,   // WARN
            Priority::Notice => 10,    // INFO2
            Priority::Info => 9,       // INFO
            Priority::Debug => 5,      // DEBUG
        }
    }
}

fn string_kv(key: &str, value: String) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value)),
        }),
    }
}

/// Convert a batch of OutputRecords to OTLP ResourceLogs
pub fn convert_to_otlp_logs(records: Vec<OutputRecord>) -> ResourceLogs {
    let observed_time_unix_nano = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let log_records: Vec<LogRecord> = records
        .into_iter()
        .map(|r| convert_record_to_log_record(r, observed_time_unix_nano))
        .collect();

    let scope_logs = ScopeLogs {
        scope: Some(InstrumentationScope {
            name: SCOPE_NAME.to_string(),
            ..Default::default()
        }),
        log_records,
        ..Default::default()
    };

    let mut resource_attributes = vec![
        string_kv(LOG_SOURCE_KEY, LOG_SOURCE_VALUE.to_string()),
        string_kv(OS_TYPE_KEY, OS_TYPE_VALUE.to_string()),
    ];

    if let Ok(hostname) = gethostname().into_string() {
        resource_attributes.push(string_kv(HOST_NAME_KEY, hostname));
    }

    ResourceLogs {
        resource: Some(Resource {
            attributes: resource_attributes,
            ..Default::default()
        }),
        scope_logs: vec![scope_logs],
        ..Default::default()
    }
}

fn convert_record_to_log_record(record: OutputRecord, observed_time_unix_nano: u64) -> LogRecord {
    let OutputRecord { tag, time, record } = record;

    // Field names may have been stripped of their leading underscore, but
    // MESSAGE and PRIORITY are user fields and never carry one
    let priority = record.get(PRIORITY_FIELD).and_then(|p| Priority::parse(p));
    let body = record.get(MESSAGE_FIELD).map(|message| AnyValue {
        value: Some(any_value::Value::StringValue(message.clone())),
    });

    let mut attributes = Vec::with_capacity(record.len() + 1);
    attributes.push(string_kv(JOURNALD_TAG_KEY, tag));
    attributes.extend(
        record
            .into_iter()
            .filter(|(name, _)| name != MESSAGE_FIELD)
            .map(|(name, value)| string_kv(&name, value)),
    );

    LogRecord {
        time_unix_nano: time.saturating_mul(NANOS_PER_SEC),
        observed_time_unix_nano,
        severity_number: priority.map(|p| p.to_otel_severity_number()).unwrap_or(0),
        severity_text: priority.map(|p| p.as_str().to_string()).unwrap_or_default(),
        body,
        attributes,
        ..Default::default()
    }
}
