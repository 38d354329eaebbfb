//! Runtime configuration for the ingestion pipeline and the index sink.
//!
//! Values are resolved once at startup and handed to each component as an
//! immutable value. Later sources win: built-in defaults, then an optional
//! TOML file, then the environment, then command-line flags in the binary.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_QUEUE_CAPACITY: usize = 1;
const DEFAULT_COLLECTION: &str = "email";
const DEFAULT_FLUSH_DOCUMENTS: usize = 400;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be a positive integer")]
    NotPositive(&'static str),
    #[error("collection name `{0}` must be non-empty and use only ASCII letters, digits, `-` or `_`")]
    InvalidCollection(String),
    #[error("failed to read config file {path:?}: {reason}")]
    Read { path: PathBuf, reason: String },
    #[error("failed to parse config file {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Settings read from a TOML config file. Every key is optional.
///
/// ```toml
/// mbox = "/var/mail/archive.mbox"
/// batch = 50
/// threads = 8
/// index = "email"
///
/// [meilisearch]
/// url = "http://search:7700"
/// flush_documents = 1000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub mbox: Option<PathBuf>,
    pub batch: Option<usize>,
    pub threads: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub index: Option<String>,
    pub meilisearch: MeilisearchFileConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeilisearchFileConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub flush_documents: Option<usize>,
    pub wait_for_tasks: Option<bool>,
    pub task_timeout_ms: Option<u64>,
    pub task_poll_ms: Option<u64>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_toml(&content).map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }
}

/// Settings for the reader, queue and worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Messages per batch handed from the reader to the workers.
    pub batch_size: usize,
    /// Number of indexing workers.
    pub worker_count: usize,
    /// Batches the queue may hold before the reader blocks.
    pub queue_capacity: usize,
    /// Target collection in the document index.
    pub collection: String,
}

impl IngestConfig {
    pub fn from_env() -> Self {
        Self::from_sources(&FileConfig::default())
    }

    /// File values over defaults, environment over both.
    pub fn from_sources(file: &FileConfig) -> Self {
        Self {
            batch_size: env_usize("MBOX_BATCH_SIZE", file.batch.unwrap_or(DEFAULT_BATCH_SIZE)),
            worker_count: env_usize(
                "MBOX_WORKERS",
                file.threads.unwrap_or_else(num_cpus::get),
            ),
            queue_capacity: env_usize(
                "MBOX_QUEUE_CAPACITY",
                file.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            ),
            collection: env_string(
                "MBOX_INDEX",
                file.index.as_deref().unwrap_or(DEFAULT_COLLECTION),
            ),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::NotPositive("batch size"));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::NotPositive("worker count"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::NotPositive("queue capacity"));
        }

        let valid_name = !self.collection.is_empty()
            && self
                .collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid_name {
            return Err(ConfigError::InvalidCollection(self.collection.clone()));
        }

        Ok(())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            worker_count: num_cpus::get(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

/// Settings for the Meilisearch bulk sink.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Buffered documents that trigger a flush.
    pub flush_documents: usize,
    /// Wait for each write task to finish before accepting more documents.
    pub wait_for_tasks: bool,
    pub task_timeout: Duration,
    pub task_poll_interval: Duration,
}

impl SinkConfig {
    pub fn from_env() -> Self {
        Self::from_sources(&FileConfig::default())
    }

    pub fn from_sources(file: &FileConfig) -> Self {
        let meili = &file.meilisearch;
        Self {
            base_url: env_string(
                "MEILISEARCH_URL",
                meili.url.as_deref().unwrap_or("http://localhost:7700"),
            ),
            api_key: env::var("MEILISEARCH_API_KEY")
                .ok()
                .or_else(|| meili.api_key.clone())
                .filter(|key| !key.trim().is_empty()),
            flush_documents: env_usize(
                "SINK_FLUSH_DOCUMENTS",
                meili.flush_documents.unwrap_or(DEFAULT_FLUSH_DOCUMENTS),
            )
            .max(1),
            wait_for_tasks: env_bool("SINK_WAIT_FOR_TASKS", meili.wait_for_tasks.unwrap_or(true)),
            task_timeout: env_duration_millis(
                "SINK_TASK_TIMEOUT_MS",
                meili.task_timeout_ms.unwrap_or(60_000),
            ),
            task_poll_interval: env_duration_millis(
                "SINK_TASK_POLL_MS",
                meili.task_poll_ms.unwrap_or(200),
            ),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
