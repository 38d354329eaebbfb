use crate::config::ConfigError;
use crate::search::SinkError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort an ingestion run.
///
/// Everything that goes wrong with an individual message is logged, counted
/// and skipped instead; only these stop the pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open mailbox {path:?}: {source}")]
    StreamOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("failed to close sink: {0}")]
    SinkClose(#[source] SinkError),
}
