use crate::mail::{
    AddressError, DateError, Domain, DomainError, EnvelopeHeaders, parse_address, parse_date,
};
use crate::search::{BulkSink, EmailDocument};
use crate::sync::mbox::RawMessage;
use crate::sync::queue::BatchReceiver;
use crate::sync::stats::WorkerStats;
use mailparse::MailParseError;
use std::sync::Arc;
use thiserror::Error;

/// Reasons a message is skipped instead of indexed.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed header block: {0}")]
    Headers(#[from] MailParseError),
    #[error("missing From header")]
    MissingFrom,
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Date(#[from] DateError),
}

/// Turn a raw message into an index document.
///
/// Steps run in a fixed order (sender address, sender domain, date) and the
/// first failure decides the skip reason.
pub fn build_document(message: &RawMessage) -> Result<EmailDocument, RecordError> {
    let headers = EnvelopeHeaders::parse(&message.contents)?;

    let from = headers.from.as_deref().ok_or(RecordError::MissingFrom)?;
    let sender = parse_address(from)?.address;
    let domain = Domain::parse(&sender.domain)?;
    let date = parse_date(headers.date.as_deref())?;

    Ok(EmailDocument::new(
        message.ordinal,
        &headers,
        &sender,
        &domain,
        date,
    ))
}

/// One member of the indexing pool.
///
/// Drains batches until the queue is closed and empty. Messages inside a
/// batch are processed in order; a failing message is logged and skipped and
/// the rest of the batch carries on. Nothing is retried.
pub struct IndexingWorker<S: ?Sized> {
    id: usize,
    queue: BatchReceiver,
    sink: Arc<S>,
}

impl<S: BulkSink + ?Sized> IndexingWorker<S> {
    pub fn new(id: usize, queue: BatchReceiver, sink: Arc<S>) -> Self {
        Self { id, queue, sink }
    }

    pub async fn run(self) -> WorkerStats {
        let mut stats = WorkerStats::default();

        while let Some(batch) = self.queue.recv().await {
            log::trace!("worker {}: received {} message(s)", self.id, batch.len());
            stats.batches += 1;

            for message in &batch {
                self.process(message, &mut stats).await;
            }
        }

        log::debug!(
            "worker {}: queue drained after {} batches ({} indexed, {} skipped)",
            self.id,
            stats.batches,
            stats.indexed,
            stats.skipped()
        );
        stats
    }

    async fn process(&self, message: &RawMessage, stats: &mut WorkerStats) {
        let document = match build_document(message) {
            Ok(document) => document,
            Err(err) => {
                log::warn!(
                    "worker {}: skipping message {} ({}): {}",
                    self.id,
                    message.ordinal,
                    message.envelope,
                    err
                );
                stats.record_skip(&err);
                return;
            }
        };

        let message_id = document.message_id.clone();
        match self.sink.add(document).await {
            Ok(()) => stats.indexed += 1,
            Err(err) => {
                log::warn!(
                    "worker {}: sink rejected message {} {}: {}",
                    self.id,
                    message.ordinal,
                    message_id,
                    err
                );
                stats.dropped += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{SinkError, SinkStats};
    use crate::sync::queue::PipelineQueue;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        documents: Mutex<Vec<EmailDocument>>,
        reject_domain: Option<String>,
    }

    #[async_trait]
    impl BulkSink for RecordingSink {
        async fn add(&self, document: EmailDocument) -> Result<(), SinkError> {
            if self.reject_domain.as_deref() == Some(document.domain.as_str()) {
                return Err(SinkError::Closed);
            }
            self.documents.lock().unwrap().push(document);
            Ok(())
        }

        async fn close(&self) -> Result<SinkStats, SinkError> {
            Ok(SinkStats::default())
        }
    }

    fn message(ordinal: u64, from: &str, date: &str) -> RawMessage {
        RawMessage {
            ordinal,
            envelope: "sender Thu Jan  1 00:00:00 2015".to_string(),
            contents: format!(
                "From: {from}\r\nDate: {date}\r\nMessage-ID: <{ordinal}@test>\r\n\r\nbody\r\n"
            )
            .into_bytes(),
        }
    }

    const DATE: &str = "Thu, 1 Jan 2015 00:00:00 +0000";

    #[test]
    fn test_build_document() {
        let doc = build_document(&message(7, "Jane <jane@s.apple.com>", DATE)).unwrap();
        assert_eq!(doc.from, "jane@s.apple.com");
        assert_eq!(doc.domain, "s.apple.com");
        assert_eq!(doc.second_level_domain, "apple.com");
        assert_eq!(doc.message_id, "<7@test>");
        assert_eq!(doc.date_ts.timestamp(), 1_420_070_400);
    }

    #[test]
    fn test_build_document_skip_reasons() {
        assert!(matches!(
            build_document(&message(0, "fake", DATE)),
            Err(RecordError::Address(_))
        ));
        assert!(matches!(
            build_document(&message(0, "a@example.com", "yesterday-ish")),
            Err(RecordError::Date(_))
        ));

        let mut empty_domain = WorkerStats::default();
        let err = build_document(&message(0, "user@", DATE)).unwrap_err();
        assert!(matches!(err, RecordError::Address(_)));
        empty_domain.record_skip(&err);
        assert_eq!(empty_domain.skipped_address, 1);
        assert_eq!(empty_domain.skipped_domain, 0);

        let no_from = RawMessage {
            ordinal: 0,
            envelope: String::new(),
            contents: format!("Date: {DATE}\r\n\r\nbody\r\n").into_bytes(),
        };
        assert!(matches!(
            build_document(&no_from),
            Err(RecordError::MissingFrom)
        ));
    }

    #[tokio::test]
    async fn test_bad_message_does_not_abort_batch() {
        let sink = Arc::new(RecordingSink::default());
        let (mut tx, rx) = PipelineQueue::bounded(1);
        let worker = IndexingWorker::new(0, rx, Arc::clone(&sink));
        let handle = tokio::spawn(worker.run());

        tx.send(vec![
            message(0, "a@example.com", DATE),
            message(1, "fake", DATE),
            message(2, "b@example.org", DATE),
        ])
        .await
        .unwrap();
        tx.close();

        let stats = handle.await.unwrap();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.indexed, 2);
        assert_eq!(stats.skipped_address, 1);

        let documents = sink.documents.lock().unwrap();
        let froms: Vec<_> = documents.iter().map(|d| d.from.as_str()).collect();
        assert_eq!(froms, vec!["a@example.com", "b@example.org"]);
    }

    #[tokio::test]
    async fn test_sink_failure_drops_record() {
        let sink = Arc::new(RecordingSink {
            reject_domain: Some("example.org".to_string()),
            ..RecordingSink::default()
        });
        let (mut tx, rx) = PipelineQueue::bounded(1);
        let handle = tokio::spawn(IndexingWorker::new(3, rx, Arc::clone(&sink)).run());

        tx.send(vec![
            message(0, "a@example.org", DATE),
            message(1, "b@example.com", DATE),
        ])
        .await
        .unwrap();
        tx.close();

        let stats = handle.await.unwrap();
        assert_eq!(stats.indexed, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.processed(), 2);
    }
}
