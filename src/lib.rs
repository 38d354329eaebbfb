//! Bulk indexer for mbox mailbox files.
//!
//! A single reader splits the mailbox into batches, a pool of workers extracts
//! the sender address, sender domain and send date of each message, and the
//! resulting documents are written to a Meilisearch index.

pub mod config;
pub mod error;
pub mod mail;
pub mod search;
pub mod sync;

pub use config::{ConfigError, FileConfig, IngestConfig, SinkConfig};
pub use error::IngestError;
pub use search::{BulkSink, DryRunSink, EmailDocument, MeilisearchSink, SinkError, SinkStats};
pub use sync::{IngestPipeline, PipelineReport};

use env_logger::Env;
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Install the global logger; `RUST_LOG` overrides the default `info` filter.
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info,reqwest=warn"))
            .init();
    });
}
