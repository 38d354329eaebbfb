use reqwest::StatusCode;
use thiserror::Error;

/// Errors that occur while handing documents to the index.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("meilisearch HTTP error: {0}")]
    MeilisearchHttp(reqwest::Error),
    #[error("meilisearch service returned status {status}: {body}")]
    MeilisearchStatus { status: StatusCode, body: String },
    #[error("meilisearch task {task_uid} failed: {message}")]
    TaskFailed { task_uid: u64, message: String },
    #[error("meilisearch task {task_uid} timed out after {elapsed_ms} ms")]
    TaskTimeout { task_uid: u64, elapsed_ms: u64 },
    #[error("flush of {documents} documents failed: {source}")]
    Flush {
        documents: usize,
        #[source]
        source: Box<SinkError>,
    },
    #[error("sink is closed")]
    Closed,
}

impl SinkError {
    pub fn meili_status(status: StatusCode, body: String) -> Self {
        SinkError::MeilisearchStatus { status, body }
    }
}
