//! Meilisearch-backed bulk sink.
//!
//! Documents are buffered in memory and written in batches of
//! `SinkConfig::flush_documents` through the documents endpoint. Each write is
//! an asynchronous Meilisearch task; by default the sink polls the task until
//! it settles so that failures are attributed to the flush that caused them.
//!
//! Collection lifecycle (`ensure_collection`, `reset_collection`) lives here as
//! well but is driven by the binary, never by the pipeline itself.

use crate::config::SinkConfig;
use crate::search::error::SinkError;
use crate::search::models::EmailDocument;
use crate::search::sink::{BulkSink, SinkStats};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::time::sleep;

const PRIMARY_KEY: &str = "id";

const FILTERABLE_ATTRIBUTES: [&str; 6] = [
    "from",
    "to",
    "delivered-to",
    "domain",
    "second-level-domain",
    "date_ts",
];

const SORTABLE_ATTRIBUTES: [&str; 1] = ["date_ts"];

pub struct MeilisearchSink {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    index_uid: String,
    config: SinkConfig,
    buffer: Mutex<Vec<EmailDocument>>,
    added: AtomicU64,
    flushed: AtomicU64,
    failed: AtomicU64,
    requests: AtomicU64,
    closed: AtomicBool,
}

impl MeilisearchSink {
    pub fn new(config: SinkConfig, index_uid: impl Into<String>) -> Result<Self, SinkError> {
        let http = Client::builder()
            .user_agent("mbox-indexer/0.1")
            .build()
            .map_err(SinkError::MeilisearchHttp)?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        let api_key = config.api_key.clone();

        Ok(Self {
            http,
            base_url,
            api_key,
            index_uid: index_uid.into(),
            buffer: Mutex::new(Vec::with_capacity(config.flush_documents)),
            config,
            added: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn index_uid(&self) -> &str {
        &self.index_uid
    }

    /// Create the collection if it does not exist and apply its settings.
    pub async fn ensure_collection(&self) -> Result<(), SinkError> {
        self.create_index_if_missing(&self.index_uid, PRIMARY_KEY)
            .await?;

        let filterable_task = self
            .submit_task(
                Method::PUT,
                &format!(
                    "/indexes/{}/settings/filterable-attributes",
                    self.index_uid
                ),
                &FILTERABLE_ATTRIBUTES,
            )
            .await?;
        self.wait_for_task(filterable_task).await?;

        let sortable_task = self
            .submit_task(
                Method::PUT,
                &format!("/indexes/{}/settings/sortable-attributes", self.index_uid),
                &SORTABLE_ATTRIBUTES,
            )
            .await?;
        self.wait_for_task(sortable_task).await?;

        info!("meilisearch: collection '{}' ready", self.index_uid);
        Ok(())
    }

    /// Drop the collection and everything in it.
    pub async fn reset_collection(&self) -> Result<(), SinkError> {
        info!("meilisearch: deleting collection '{}'", self.index_uid);
        self.drop_index(&self.index_uid).await
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.url_for(path);
        let builder = self.http.request(method, url);
        self.apply_auth(builder)
    }

    fn apply_auth(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(ref key) = self.api_key {
            request.header("Authorization", format!("Bearer {}", key))
        } else {
            request
        }
    }

    async fn error_body(response: reqwest::Response) -> String {
        response
            .text()
            .await
            .unwrap_or_else(|_| "failed to read error body".to_string())
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
    ) -> Result<reqwest::Response, SinkError> {
        let response = self
            .request(method, path)
            .json(payload)
            .send()
            .await
            .map_err(SinkError::MeilisearchHttp)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = Self::error_body(response).await;
            return Err(SinkError::meili_status(status, body));
        }

        Ok(response)
    }

    async fn submit_task<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
    ) -> Result<u64, SinkError> {
        debug!("meilisearch submit_task: {method} {path}");
        let response = self.send_json(method, path, payload).await?;
        let task: TaskInfo = response
            .json()
            .await
            .map_err(SinkError::MeilisearchHttp)?;
        Ok(task.task_uid)
    }

    async fn wait_for_task(&self, task_uid: u64) -> Result<(), SinkError> {
        let timeout_ms = self.config.task_timeout.as_millis() as u64;
        let poll_ms = (self.config.task_poll_interval.as_millis() as u64).max(1);
        let mut elapsed_ms: u64 = 0;

        loop {
            let response = self
                .request(Method::GET, &format!("/tasks/{}", task_uid))
                .send()
                .await
                .map_err(SinkError::MeilisearchHttp)?;

            if !response.status().is_success() {
                let status = response.status();
                let body = Self::error_body(response).await;
                return Err(SinkError::meili_status(status, body));
            }

            let status: TaskStatus = response
                .json()
                .await
                .map_err(SinkError::MeilisearchHttp)?;

            match status.status.as_str() {
                "succeeded" => {
                    debug!(
                        "meilisearch wait_for_task: task {task_uid} succeeded after {elapsed_ms} ms"
                    );
                    return Ok(());
                }
                "failed" | "canceled" => {
                    let message = status
                        .error
                        .and_then(|err| err.message)
                        .unwrap_or_else(|| format!("task {}", status.status));
                    return Err(SinkError::TaskFailed { task_uid, message });
                }
                _ => {
                    if elapsed_ms >= timeout_ms {
                        return Err(SinkError::TaskTimeout {
                            task_uid,
                            elapsed_ms,
                        });
                    }
                    sleep(self.config.task_poll_interval).await;
                    elapsed_ms += poll_ms;
                }
            }
        }
    }

    async fn index_exists(&self, index_uid: &str) -> Result<bool, SinkError> {
        let response = self
            .request(Method::GET, &format!("/indexes/{}", index_uid))
            .send()
            .await
            .map_err(SinkError::MeilisearchHttp)?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => {
                let body = Self::error_body(response).await;
                Err(SinkError::meili_status(other, body))
            }
        }
    }

    async fn create_index_if_missing(
        &self,
        index_uid: &str,
        primary_key: &str,
    ) -> Result<(), SinkError> {
        if self.index_exists(index_uid).await? {
            return Ok(());
        }

        let payload = CreateIndexRequest {
            uid: index_uid.to_string(),
            primary_key: primary_key.to_string(),
        };

        let response = self
            .request(Method::POST, "/indexes")
            .json(&payload)
            .send()
            .await
            .map_err(SinkError::MeilisearchHttp)?;

        match response.status() {
            StatusCode::CONFLICT => Ok(()),
            status if status.is_success() => {
                let task: TaskInfo = response
                    .json()
                    .await
                    .map_err(SinkError::MeilisearchHttp)?;
                self.wait_for_task(task.task_uid).await
            }
            status => {
                let body = Self::error_body(response).await;
                Err(SinkError::meili_status(status, body))
            }
        }
    }

    async fn drop_index(&self, index_uid: &str) -> Result<(), SinkError> {
        if !self.index_exists(index_uid).await? {
            return Ok(());
        }

        let response = self
            .request(Method::DELETE, &format!("/indexes/{}", index_uid))
            .send()
            .await
            .map_err(SinkError::MeilisearchHttp)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(());
        }

        if status.is_success() {
            let task: TaskInfo = response
                .json()
                .await
                .map_err(SinkError::MeilisearchHttp)?;
            return self.wait_for_task(task.task_uid).await;
        }

        let body = Self::error_body(response).await;
        Err(SinkError::meili_status(status, body))
    }

    async fn write_documents(&self, documents: &[EmailDocument]) -> Result<(), SinkError> {
        let task = self
            .submit_task(
                Method::POST,
                &format!(
                    "/indexes/{}/documents?primaryKey={}",
                    self.index_uid, PRIMARY_KEY
                ),
                documents,
            )
            .await?;

        if self.config.wait_for_tasks {
            self.wait_for_task(task).await?;
        }

        Ok(())
    }

    async fn flush(&self, documents: Vec<EmailDocument>) -> Result<(), SinkError> {
        let count = documents.len();
        if count == 0 {
            return Ok(());
        }

        debug!(
            "meilisearch flush: writing {} documents to '{}'",
            count, self.index_uid
        );
        self.requests.fetch_add(1, Ordering::Relaxed);

        match self.write_documents(&documents).await {
            Ok(()) => {
                self.flushed.fetch_add(count as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.failed.fetch_add(count as u64, Ordering::Relaxed);
                Err(SinkError::Flush {
                    documents: count,
                    source: Box::new(err),
                })
            }
        }
    }

    fn stats(&self) -> SinkStats {
        SinkStats {
            added: self.added.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl BulkSink for MeilisearchSink {
    async fn add(&self, document: EmailDocument) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }

        let ready = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(document);
            self.added.fetch_add(1, Ordering::Relaxed);
            if buffer.len() >= self.config.flush_documents {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };

        match ready {
            Some(documents) => self.flush(documents).await,
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<SinkStats, SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SinkError::Closed);
        }

        let remaining = std::mem::take(&mut *self.buffer.lock().await);
        if let Err(err) = self.flush(remaining).await {
            warn!("meilisearch close: final flush failed: {}", err);
        }

        let stats = self.stats();
        info!(
            "meilisearch close: {} added, {} flushed, {} failed in {} requests",
            stats.added, stats.flushed, stats.failed, stats.requests
        );
        Ok(stats)
    }
}

#[derive(Deserialize)]
struct TaskInfo {
    #[serde(rename = "taskUid")]
    task_uid: u64,
}

#[derive(Deserialize)]
struct TaskStatus {
    status: String,
    error: Option<TaskError>,
}

#[derive(Deserialize)]
struct TaskError {
    message: Option<String>,
}

#[derive(Serialize)]
struct CreateIndexRequest {
    uid: String,
    #[serde(rename = "primaryKey")]
    primary_key: String,
}
