//! Index-facing side: the document model, the sink contract and its implementations.

pub mod error;
pub mod models;
pub mod service;
pub mod sink;

pub use error::SinkError;
pub use models::EmailDocument;
pub use service::MeilisearchSink;
pub use sink::{BulkSink, DryRunSink, SinkStats};
