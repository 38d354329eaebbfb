//! The write side of the pipeline.
//!
//! Workers hand documents to a [`BulkSink`] one at a time. A sink may buffer
//! and flush internally; the pipeline only relies on `add` queueing a single
//! document and `close` flushing whatever is pending and reporting counts.
//! Neither call is retried by the caller.

use crate::search::error::SinkError;
use crate::search::models::EmailDocument;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Counters reported by a sink when it is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Documents accepted by `add`.
    pub added: u64,
    /// Documents confirmed written to the index.
    pub flushed: u64,
    /// Documents that were accepted but whose flush failed.
    pub failed: u64,
    /// Write requests issued against the index.
    pub requests: u64,
}

#[async_trait]
pub trait BulkSink: Send + Sync {
    /// Queue one document for eventual write.
    async fn add(&self, document: EmailDocument) -> Result<(), SinkError>;

    /// Flush pending documents and report counts. Called once per run.
    async fn close(&self) -> Result<SinkStats, SinkError>;
}

/// Sink that counts documents without writing them anywhere.
#[derive(Debug, Default)]
pub struct DryRunSink {
    added: AtomicU64,
    closed: AtomicBool,
}

impl DryRunSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BulkSink for DryRunSink {
    async fn add(&self, document: EmailDocument) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }

        log::trace!(
            "dry run: {} from {} ({})",
            document.id,
            document.from,
            document.date_ts
        );
        self.added.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> Result<SinkStats, SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SinkError::Closed);
        }

        let added = self.added.load(Ordering::Relaxed);
        Ok(SinkStats {
            added,
            flushed: added,
            failed: 0,
            requests: 0,
        })
    }
}
