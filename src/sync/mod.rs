//! Mailbox ingestion pipeline.
//!
//! # Architecture Overview
//!
//! - **`mbox`**: reads messages from the mailbox stream and groups them into
//!   fixed-size batches.
//! - **`queue`**: bounded hand-off between the single reader and the workers;
//!   a full queue blocks the reader (backpressure).
//! - **`worker`**: indexing workers that turn messages into documents and hand
//!   them to the sink.
//! - **`stats`**: per-component counters merged into the final report.
//!
//! ## Data Flow
//!
//! 1. **Reading**: the reader runs on a blocking thread, pulls messages from
//!    the stream and sends each full (or final partial) batch to the queue
//! 2. **Indexing**: `worker_count` tasks drain the queue; each message is parsed
//!    (sender, domain, date) and added to the sink, or logged and skipped
//! 3. **Shutdown**: the reader closes the queue after its last batch, workers
//!    exit once it is drained, and the pipeline closes the sink exactly once
//!    after every worker has been joined
//!
//! ## Ordering
//!
//! Batches leave the queue in the order they were read, but different workers
//! process them concurrently, so documents reach the sink in no particular
//! global order. Within a batch, messages are handled strictly in sequence.
//!
//! ## Limitations
//!
//! There is no cancellation or timeout at this level: a stalled sink stalls
//! the workers, which in turn stalls the reader.

pub mod mbox;
pub mod queue;
pub mod stats;
pub mod worker;

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::search::{BulkSink, SinkStats};
use crate::sync::mbox::{MboxBatchReader, open_mailbox};
use crate::sync::queue::PipelineQueue;
use crate::sync::stats::{PipelineStats, WorkerStats};
use crate::sync::worker::IndexingWorker;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub stats: PipelineStats,
    pub sink: SinkStats,
}

/// Reader, queue and worker pool wired to a sink.
pub struct IngestPipeline {
    config: IngestConfig,
    sink: Arc<dyn BulkSink>,
}

impl IngestPipeline {
    pub fn new(config: IngestConfig, sink: Arc<dyn BulkSink>) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self { config, sink })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Open the mailbox at `path` and ingest it.
    ///
    /// Failing to open the file is the only fatal input error.
    pub async fn run_path(self, path: &Path) -> Result<PipelineReport, IngestError> {
        let reader = open_mailbox(path).map_err(|source| {
            log::error!("could not open mailbox {}: {}", path.display(), source);
            IngestError::StreamOpen {
                path: path.to_path_buf(),
                source,
            }
        })?;

        log::info!("ingesting {}", path.display());
        self.run(reader).await
    }

    /// Ingest every message of `reader`, then close the sink.
    pub async fn run<R>(self, reader: R) -> Result<PipelineReport, IngestError>
    where
        R: BufRead + Send + 'static,
    {
        let IngestConfig {
            batch_size,
            worker_count,
            queue_capacity,
            ref collection,
        } = self.config;

        log::info!(
            "starting {} workers (batch size {}, queue capacity {}) for collection '{}'",
            worker_count,
            batch_size,
            queue_capacity,
            collection
        );

        let (mut sender, receiver) = PipelineQueue::bounded(queue_capacity);

        let workers: Vec<_> = (0..worker_count)
            .map(|id| {
                let worker = IndexingWorker::new(id, receiver.clone(), Arc::clone(&self.sink));
                tokio::spawn(worker.run())
            })
            .collect();
        drop(receiver);

        let producer = tokio::task::spawn_blocking(move || {
            let mut batches = MboxBatchReader::new(reader, batch_size);
            if let Err(err) = batches.pump(&sender) {
                log::error!("mailbox reader stopped early: {}", err);
            }
            log::info!("closing message queue");
            sender.close();
            batches.stats()
        });
        let reader_result = producer.await;

        log::info!("waiting for workers to finish");
        let mut worker_stats = WorkerStats::default();
        let mut worker_failure = None;
        for handle in workers {
            match handle.await {
                Ok(stats) => worker_stats.merge(stats),
                Err(err) => {
                    log::error!("indexing worker failed: {}", err);
                    if worker_failure.is_none() {
                        worker_failure = Some(err);
                    }
                }
            }
        }

        let sink_stats = self.sink.close().await.map_err(|err| {
            log::error!("failed to close sink: {}", err);
            IngestError::SinkClose(err)
        })?;

        let reader_stats = reader_result?;
        if let Some(err) = worker_failure {
            return Err(IngestError::Join(err));
        }

        let stats = PipelineStats {
            reader: reader_stats,
            workers: worker_stats,
        };

        log::info!(
            "processed {} messages: {} indexed, {} skipped ({} unreadable, {} headers, {} address, {} domain, {} date, {} dropped by sink)",
            stats.total_slots(),
            stats.indexed(),
            stats.skipped(),
            stats.reader.read_failures,
            stats.workers.skipped_headers,
            stats.workers.skipped_address,
            stats.workers.skipped_domain,
            stats.workers.skipped_date,
            stats.workers.dropped
        );

        Ok(PipelineReport {
            stats,
            sink: sink_stats,
        })
    }
}
