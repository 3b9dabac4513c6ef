// SPDX-License-Identifier: Apache-2.0

//! Journald receiver end-to-end tests
//!
//! Run against the journal export under `tests/fixture/journal`: 461 entries,
//! three of them from `systemd-journald.service`, the newest one a root login
//! on tty1.

use rotel_journald::bounded_channel::bounded;
use rotel_journald::receivers::journald::{
    Batch, ChannelSink, Cursor, Error, ExportJournalOpener, FilterSet, JournaldReceiver,
    JournaldReceiverConfig, OutputRecord, Sink, SinkError,
};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

// Time to keep running after the expected records arrived, to catch extras
const SETTLE_TIME: Duration = Duration::from_millis(200);

const FIXTURE_ENTRIES: usize = 461;

const NEWEST_CURSOR: &str = "s=add4782f78ca4b6e84aa88d34e5b4a9d;i=1cd;b=4737ffc504774b3ba67020bc947f1bc0;m=42f2dd;t=4d905e4cd5a92;x=25b3f86ff2774ac4";
const MIDDLE_CURSOR: &str = "s=add4782f78ca4b6e84aa88d34e5b4a9d;i=13f;b=4737ffc504774b3ba67020bc947f1bc0;m=ffadd;t=4d905e49a6291;x=9a11dd9ffee96e9f";

fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixture/journal")
}

/// Copy the fixture journal into `dir` so the test can append to it
fn copy_fixture(dir: &Path) -> PathBuf {
    let journal = dir.join("journal");
    std::fs::create_dir_all(&journal).unwrap();
    std::fs::copy(
        fixture_path().join("system.jsonl"),
        journal.join("system.jsonl"),
    )
    .unwrap();
    journal
}

fn test_config() -> JournaldReceiverConfig {
    JournaldReceiverConfig::new("test", fixture_path())
        .with_read_timeout(Duration::from_millis(20))
        .with_backoff(Duration::from_millis(10), Duration::from_millis(100))
}

#[derive(Clone, Default)]
struct CollectingSink {
    records: Arc<Mutex<Vec<OutputRecord>>>,
    overflows: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl CollectingSink {
    fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    fn records(&self) -> Vec<OutputRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl Sink for CollectingSink {
    fn emit(&self, batch: Batch) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .overflows
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SinkError::Overflow(batch));
        }
        self.records.lock().unwrap().extend(batch);
        Ok(())
    }
}

/// Run a receiver until `done` holds, then for a little longer, then shut it down.
async fn run_until<S: Sink>(config: JournaldReceiverConfig, sink: S, done: impl Fn() -> bool) {
    let receiver = JournaldReceiver::new(config, ExportJournalOpener::default(), sink).unwrap();
    let cancel = CancellationToken::new();

    let stop = async {
        let deadline = Instant::now() + TEST_TIMEOUT;
        while !done() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(SETTLE_TIME).await;
        cancel.cancel();
    };

    let (result, ()) = tokio::join!(receiver.run(cancel.clone()), stop);
    result.unwrap();
}

fn login_record(strip_underscores: bool) -> OutputRecord {
    let fields = [
        ("_UID", "0"),
        ("_GID", "0"),
        ("_BOOT_ID", "4737ffc504774b3ba67020bc947f1bc0"),
        ("_MACHINE_ID", "bb9d0a52a41243829ecd729b40ac0bce"),
        ("_HOSTNAME", "arch"),
        ("PRIORITY", "5"),
        ("_TRANSPORT", "syslog"),
        ("SYSLOG_FACILITY", "10"),
        ("SYSLOG_IDENTIFIER", "login"),
        ("_PID", "141"),
        ("_COMM", "login"),
        ("_EXE", "/bin/login"),
        ("_AUDIT_SESSION", "1"),
        ("_AUDIT_LOGINUID", "0"),
        ("MESSAGE", "ROOT LOGIN ON tty1"),
        ("_CMDLINE", "login -- root      "),
        ("_SYSTEMD_CGROUP", "/user/root/1"),
        ("_SYSTEMD_SESSION", "1"),
        ("_SYSTEMD_OWNER_UID", "0"),
        ("_SOURCE_REALTIME_TIMESTAMP", "1364519243563178"),
    ];

    let record: BTreeMap<String, String> = fields
        .iter()
        .map(|(k, v)| {
            let key = if strip_underscores {
                k.strip_prefix('_').unwrap_or(k)
            } else {
                k
            };
            (key.to_string(), v.to_string())
        })
        .collect();

    OutputRecord {
        tag: "test".to_string(),
        time: 1_364_519_243,
        record,
    }
}

#[test]
fn test_missing_tag_is_config_error() {
    let config = JournaldReceiverConfig {
        path: fixture_path(),
        ..Default::default()
    };
    let result = JournaldReceiver::new(
        config,
        ExportJournalOpener::default(),
        CollectingSink::default(),
    );
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_tail_emits_newest_entry() {
    let sink = CollectingSink::default();
    run_until(test_config(), sink.clone(), || sink.len() >= 1).await;

    assert_eq!(sink.records(), vec![login_record(false)]);
}

#[tokio::test]
async fn test_tail_with_strip_underscores() {
    let sink = CollectingSink::default();
    let config = test_config().with_strip_underscores(true);
    run_until(config, sink.clone(), || sink.len() >= 1).await;

    let records = sink.records();
    assert_eq!(records, vec![login_record(true)]);
    assert!(records[0].record.contains_key("UID"));
    assert!(records[0].record.contains_key("SYSTEMD_OWNER_UID"));
}

#[tokio::test]
async fn test_read_from_head_emits_every_entry() {
    let sink = CollectingSink::default();
    let config = test_config().with_read_from_head(true);
    run_until(config, sink.clone(), || sink.len() >= FIXTURE_ENTRIES).await;

    let records = sink.records();
    assert_eq!(records.len(), FIXTURE_ENTRIES);
    assert!(records.iter().all(|r| r.tag == "test"));
    assert_eq!(records.last().unwrap(), &login_record(false));
    // journal order is preserved
    assert!(records.windows(2).all(|w| w[0].time <= w[1].time));
}

#[tokio::test]
async fn test_filters_select_matching_entries() {
    let sink = CollectingSink::default();
    let filters =
        FilterSet::from_json(r#"[{"_SYSTEMD_UNIT": "systemd-journald.service"}]"#).unwrap();
    let config = test_config().with_read_from_head(true).with_filters(filters);
    run_until(config, sink.clone(), || sink.len() >= 3).await;

    let records = sink.records();
    assert_eq!(records.len(), 3);
    assert!(
        records
            .iter()
            .all(|r| r.record["_SYSTEMD_UNIT"] == "systemd-journald.service")
    );
}

#[tokio::test]
async fn test_resumes_after_pos_file_cursor() {
    let temp_dir = tempfile::tempdir().unwrap();
    let pos = temp_dir.path().join("foo.pos");
    std::fs::write(&pos, MIDDLE_CURSOR).unwrap();

    let sink = CollectingSink::default();
    let config = test_config().with_read_from_head(true).with_pos_file(&pos);
    run_until(config, sink.clone(), || sink.len() >= 142).await;

    assert_eq!(sink.len(), 142);
    assert_eq!(std::fs::read_to_string(&pos).unwrap(), NEWEST_CURSOR);
}

#[traced_test]
#[tokio::test]
async fn test_invalid_pos_file_falls_back_to_head() {
    let temp_dir = tempfile::tempdir().unwrap();
    let pos = temp_dir.path().join("foo.pos");
    std::fs::write(&pos, "thisisinvalid").unwrap();

    let sink = CollectingSink::default();
    let config = test_config().with_read_from_head(true).with_pos_file(&pos);
    run_until(config, sink.clone(), || sink.len() >= FIXTURE_ENTRIES).await;

    assert_eq!(sink.len(), FIXTURE_ENTRIES);
    assert!(logs_contain(&format!(
        "Could not seek to cursor thisisinvalid found in pos file: {}, falling back to reading from head",
        pos.display()
    )));
}

#[tokio::test]
async fn test_storage_file_keeps_cursor_under_journal_key() {
    let temp_dir = tempfile::tempdir().unwrap();
    let storage = temp_dir.path().join("storage.json");

    let sink = CollectingSink::default();
    let config = test_config().with_storage_path(&storage);
    run_until(config, sink.clone(), || storage.exists()).await;

    assert_eq!(sink.len(), 1);
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&storage).unwrap()).unwrap();
    assert_eq!(raw["journal"], NEWEST_CURSOR);
}

#[traced_test]
#[tokio::test]
async fn test_missing_journal_is_retried() {
    let sink = CollectingSink::default();
    let config = test_config().with_open_retry_interval(Duration::from_secs(1));
    let config = JournaldReceiverConfig {
        path: PathBuf::from("test/not_a_real_path"),
        ..config
    };

    let started = Instant::now();
    run_until(config, sink.clone(), || {
        started.elapsed() > Duration::from_millis(100)
    })
    .await;

    assert_eq!(sink.len(), 0);
    assert!(logs_contain("No such file or directory"));
    assert!(logs_contain("retrying in 1s"));
}

#[tokio::test]
async fn test_overflow_is_retried_before_checkpoint() {
    let temp_dir = tempfile::tempdir().unwrap();
    let pos = temp_dir.path().join("foo.pos");

    let sink = CollectingSink {
        overflows: Arc::new(AtomicUsize::new(1)),
        ..Default::default()
    };
    let config = test_config().with_pos_file(&pos);
    run_until(config, sink.clone(), || sink.len() >= 1).await;

    assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(sink.records(), vec![login_record(false)]);
    assert_eq!(std::fs::read_to_string(&pos).unwrap(), NEWEST_CURSOR);
}

#[tokio::test]
async fn test_restart_resumes_without_gap_or_duplicate() {
    let temp_dir = tempfile::tempdir().unwrap();
    let journal = copy_fixture(temp_dir.path());
    let pos = temp_dir.path().join("foo.pos");

    let config = JournaldReceiverConfig::new("test", &journal)
        .with_read_timeout(Duration::from_millis(20))
        .with_read_from_head(true)
        .with_pos_file(&pos);

    let first = CollectingSink::default();
    run_until(config.clone(), first.clone(), || first.len() >= FIXTURE_ENTRIES).await;
    assert_eq!(first.len(), FIXTURE_ENTRIES);

    // written while no receiver is running
    let mut file = OpenOptions::new()
        .append(true)
        .open(journal.join("system.jsonl"))
        .unwrap();
    writeln!(
        file,
        r#"{{"__CURSOR":"s=add4782f78ca4b6e84aa88d34e5b4a9d;i=1ce","__REALTIME_TIMESTAMP":"1364519250000000","MESSAGE":"after restart","_PID":"1"}}"#
    )
    .unwrap();
    drop(file);

    let second = CollectingSink::default();
    run_until(config, second.clone(), || second.len() >= 1).await;

    let records = second.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].record["MESSAGE"], "after restart");
    assert_eq!(records[0].time, 1_364_519_250);
    assert_eq!(
        Cursor::new(std::fs::read_to_string(&pos).unwrap()),
        Cursor::from("s=add4782f78ca4b6e84aa88d34e5b4a9d;i=1ce")
    );
}

#[tokio::test]
async fn test_follows_appended_entries() {
    let temp_dir = tempfile::tempdir().unwrap();
    let journal = copy_fixture(temp_dir.path());
    let file_path = journal.join("system.jsonl");

    let sink = CollectingSink::default();
    let config = JournaldReceiverConfig::new("test", &journal)
        .with_read_timeout(Duration::from_millis(20));

    let writer = {
        let sink = sink.clone();
        async move {
            let deadline = Instant::now() + TEST_TIMEOUT;
            while sink.len() < 1 && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let mut file = OpenOptions::new().append(true).open(&file_path).unwrap();
            for i in 0..3 {
                writeln!(
                    file,
                    r#"{{"__CURSOR":"appended-{}","__REALTIME_TIMESTAMP":"1364519260000000","MESSAGE":"appended {}"}}"#,
                    i, i
                )
                .unwrap();
            }
        }
    };

    let (_, ()) = tokio::join!(run_until(config, sink.clone(), || sink.len() >= 4), writer);

    let messages: Vec<String> = sink
        .records()
        .iter()
        .map(|r| r.record["MESSAGE"].clone())
        .collect();
    assert_eq!(
        messages,
        vec![
            "ROOT LOGIN ON tty1",
            "appended 0",
            "appended 1",
            "appended 2"
        ]
    );
}

#[tokio::test]
async fn test_channel_sink_delivers_batches() {
    let (tx, rx) = bounded::<Batch>(16);
    let config = test_config().with_read_from_head(true).with_batch_size(50);

    let received = Arc::new(AtomicUsize::new(0));
    let done = {
        let received = received.clone();
        move || {
            while let Some(batch) = rx.try_recv() {
                assert!(batch.len() <= 50);
                received.fetch_add(batch.len(), Ordering::SeqCst);
            }
            received.load(Ordering::SeqCst) >= FIXTURE_ENTRIES
        }
    };

    run_until(config, ChannelSink::new(tx), done).await;
    assert_eq!(received.load(Ordering::SeqCst), FIXTURE_ENTRIES);
}
