use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use mbox_indexer::{
    BulkSink, DryRunSink, EmailDocument, IngestConfig, IngestError, IngestPipeline, SinkError,
    SinkStats,
};

#[derive(Default)]
struct RecordingSink {
    documents: Mutex<Vec<EmailDocument>>,
    close_calls: AtomicUsize,
}

#[async_trait]
impl BulkSink for RecordingSink {
    async fn add(&self, document: EmailDocument) -> Result<(), SinkError> {
        assert_eq!(
            self.close_calls.load(Ordering::SeqCst),
            0,
            "add after close"
        );
        self.documents.lock().unwrap().push(document);
        Ok(())
    }

    async fn close(&self) -> Result<SinkStats, SinkError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let added = self.documents.lock().unwrap().len() as u64;
        Ok(SinkStats {
            added,
            flushed: added,
            failed: 0,
            requests: 1,
        })
    }
}

struct FailingCloseSink;

#[async_trait]
impl BulkSink for FailingCloseSink {
    async fn add(&self, _document: EmailDocument) -> Result<(), SinkError> {
        Ok(())
    }

    async fn close(&self) -> Result<SinkStats, SinkError> {
        Err(SinkError::Closed)
    }
}

fn config(batch_size: usize, worker_count: usize) -> IngestConfig {
    IngestConfig {
        batch_size,
        worker_count,
        queue_capacity: 1,
        collection: "email".to_string(),
    }
}

fn message(n: usize, from: &str, date: Option<&str>) -> String {
    let mut out = format!("From sender@example.com Thu Jan  1 00:00:00 2015\nFrom: {from}\n");
    if let Some(date) = date {
        out.push_str(&format!("Date: {date}\n"));
    }
    out.push_str(&format!(
        "Message-ID: <{n}@example.com>\nTo: list@lists.example.org\n\nbody of {n}\n>From the archives\n\n"
    ));
    out
}

const DATE: &str = "Tue, 1 Jul 2003 10:52:37 +0200";

/// Leading garbage, seven good messages, a bad sender and a missing date.
fn mixed_mailbox() -> String {
    let mut mbox = String::from("this is not a mailbox header\n\n");
    for n in 0..4 {
        mbox.push_str(&message(n, &format!("User {n} <user{n}@mail.example.com>"), Some(DATE)));
    }
    mbox.push_str(&message(4, "fake", Some(DATE)));
    mbox.push_str(&message(
        5,
        r#""\"iTunes Store\"" <do_not_reply@itunes.com>"#,
        Some(DATE),
    ));
    mbox.push_str(&message(6, "nodate@example.net", None));
    for n in 7..9 {
        mbox.push_str(&message(n, &format!("dev{n}@kernel.org"), Some(DATE)));
    }
    mbox
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pipeline_accounts_for_every_slot() {
    let sink = Arc::new(RecordingSink::default());
    let pipeline = IngestPipeline::new(config(3, 4), sink.clone()).unwrap();

    let report = pipeline
        .run(Cursor::new(mixed_mailbox().into_bytes()))
        .await
        .unwrap();
    let stats = report.stats;

    assert_eq!(stats.reader.read, 9);
    assert_eq!(stats.reader.read_failures, 1);
    assert_eq!(stats.reader.batches, 3);
    assert_eq!(stats.workers.batches, 3);
    assert_eq!(stats.total_slots(), 10);
    assert_eq!(stats.indexed(), 7);
    assert_eq!(stats.workers.skipped_address, 1);
    assert_eq!(stats.workers.skipped_date, 1);
    assert_eq!(stats.indexed() + stats.skipped(), stats.total_slots());

    assert_eq!(sink.close_calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.sink.added, 7);

    let documents = sink.documents.lock().unwrap();
    let ids: HashSet<_> = documents.iter().map(|d| d.id.clone()).collect();
    assert_eq!(ids.len(), 7);

    let itunes = documents
        .iter()
        .find(|d| d.domain == "itunes.com")
        .expect("escaped display name is indexed");
    assert_eq!(itunes.from, "do_not_reply@itunes.com");
    assert_eq!(itunes.second_level_domain, "itunes.com");
    assert_eq!(itunes.date_ts.timestamp(), 1_057_049_557);

    let nested = documents
        .iter()
        .find(|d| d.domain == "mail.example.com")
        .unwrap();
    assert_eq!(nested.second_level_domain, "example.com");
}

#[tokio::test]
async fn single_worker_with_batch_of_one() {
    let sink = Arc::new(RecordingSink::default());
    let report = IngestPipeline::new(config(1, 1), sink.clone())
        .unwrap()
        .run(Cursor::new(mixed_mailbox().into_bytes()))
        .await
        .unwrap();

    assert_eq!(report.stats.reader.batches, 9);
    assert_eq!(report.stats.indexed(), 7);
    assert_eq!(sink.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_stream_still_closes_sink() {
    let sink = Arc::new(RecordingSink::default());
    let report = IngestPipeline::new(config(10, 2), sink.clone())
        .unwrap()
        .run(Cursor::new(Vec::new()))
        .await
        .unwrap();

    assert_eq!(report.stats.total_slots(), 0);
    assert_eq!(report.stats.reader.batches, 0);
    assert_eq!(sink.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_mailbox_is_fatal() {
    let sink = Arc::new(RecordingSink::default());
    let result = IngestPipeline::new(config(10, 2), sink.clone())
        .unwrap()
        .run_path(Path::new("/definitely/not/here.mbox"))
        .await;

    assert!(matches!(result, Err(IngestError::StreamOpen { .. })));
    assert_eq!(sink.close_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn invalid_config_is_rejected() {
    let sink = Arc::new(DryRunSink::new());
    let result = IngestPipeline::new(config(0, 2), sink);
    assert!(matches!(result, Err(IngestError::Config(_))));
}

#[tokio::test]
async fn sink_close_failure_is_reported() {
    let result = IngestPipeline::new(config(2, 2), Arc::new(FailingCloseSink))
        .unwrap()
        .run(Cursor::new(mixed_mailbox().into_bytes()))
        .await;

    assert!(matches!(result, Err(IngestError::SinkClose(_))));
}

#[tokio::test]
async fn gzip_mailbox_from_disk() {
    let file = tempfile::Builder::new()
        .suffix(".mbox.gz")
        .tempfile()
        .unwrap();
    let mut encoder = GzEncoder::new(file.reopen().unwrap(), Compression::default());
    encoder.write_all(mixed_mailbox().as_bytes()).unwrap();
    encoder.finish().unwrap();

    let report = IngestPipeline::new(config(4, 3), Arc::new(DryRunSink::new()))
        .unwrap()
        .run_path(file.path())
        .await
        .unwrap();

    assert_eq!(report.stats.total_slots(), 10);
    assert_eq!(report.stats.indexed(), 7);
    assert_eq!(report.sink.added, 7);
    assert_eq!(report.sink.requests, 0);
}

#[tokio::test]
async fn plain_mailbox_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(mixed_mailbox().as_bytes()).unwrap();
    file.flush().unwrap();

    let sink = Arc::new(RecordingSink::default());
    let report = IngestPipeline::new(config(5, 2), sink.clone())
        .unwrap()
        .run_path(file.path())
        .await
        .unwrap();

    assert_eq!(report.stats.reader.batches, 2);
    assert_eq!(report.stats.indexed(), 7);
    assert_eq!(sink.documents.lock().unwrap().len(), 7);
}
