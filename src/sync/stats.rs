//! Ingestion statistics.
//!
//! The reader owns its counters outright; each worker keeps a private
//! [`WorkerStats`] that is merged once all workers have exited, so no counter is
//! shared between tasks while the pipeline is running.

use crate::sync::worker::RecordError;

/// Counters owned by the mailbox reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Messages successfully read from the stream.
    pub read: u64,
    /// Message slots that could not be read and were skipped.
    pub read_failures: u64,
    /// Batches handed to the queue.
    pub batches: u64,
}

/// Counters kept by a single indexing worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Batches received from the queue
    pub batches: u64,
    /// Documents accepted by the sink
    pub indexed: u64,
    /// Messages whose header block could not be parsed
    pub skipped_headers: u64,
    /// Messages without a usable sender address
    pub skipped_address: u64,
    /// Messages whose sender domain was rejected.
    ///
    /// Address parsing already refuses an empty domain (counted under
    /// `skipped_address`), so with the current domain rules this stays 0.
    pub skipped_domain: u64,
    /// Messages without a usable Date header
    pub skipped_date: u64,
    /// Documents the sink refused
    pub dropped: u64,
}

impl WorkerStats {
    /// Merge another worker's counters into this one by summing all counts.
    pub fn merge(&mut self, other: WorkerStats) {
        self.batches += other.batches;
        self.indexed += other.indexed;
        self.skipped_headers += other.skipped_headers;
        self.skipped_address += other.skipped_address;
        self.skipped_domain += other.skipped_domain;
        self.skipped_date += other.skipped_date;
        self.dropped += other.dropped;
    }

    pub fn record_skip(&mut self, err: &RecordError) {
        match err {
            RecordError::Headers(_) => self.skipped_headers += 1,
            RecordError::MissingFrom | RecordError::Address(_) => self.skipped_address += 1,
            RecordError::Domain(_) => self.skipped_domain += 1,
            RecordError::Date(_) => self.skipped_date += 1,
        }
    }

    /// Messages received that did not end up indexed.
    pub fn skipped(&self) -> u64 {
        self.skipped_headers
            + self.skipped_address
            + self.skipped_domain
            + self.skipped_date
            + self.dropped
    }

    /// Messages received from the queue.
    pub fn processed(&self) -> u64 {
        self.indexed + self.skipped()
    }
}

/// Final statistics for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub reader: ReaderStats,
    pub workers: WorkerStats,
}

impl PipelineStats {
    /// Every message slot the reader encountered.
    pub fn total_slots(&self) -> u64 {
        self.reader.read + self.reader.read_failures
    }

    pub fn indexed(&self) -> u64 {
        self.workers.indexed
    }

    /// Slots skipped for any reason, from unreadable slots to sink refusals.
    pub fn skipped(&self) -> u64 {
        self.reader.read_failures + self.workers.skipped()
    }
}
