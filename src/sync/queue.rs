//! Bounded hand-off between the mailbox reader and the indexing workers.
//!
//! One producer, any number of consumers. Sends block while the queue is full,
//! which keeps the reader at most `capacity` batches ahead of the workers.
//! Consumers share a single receiver behind an async mutex; whichever worker
//! is waiting gets the next batch.
//!
//! Closing the sender is the only termination signal: consumers drain what is
//! still buffered and then observe the end of the stream.

use crate::sync::mbox::MessageBatch;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
    #[error("no consumers left to receive from the queue")]
    Disconnected,
}

pub struct PipelineQueue;

impl PipelineQueue {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            QueueSender { inner: Some(tx) },
            QueueReceiver {
                inner: Arc::new(Mutex::new(rx)),
            },
        )
    }
}

/// Producing half. Not `Clone`: the queue has exactly one producer.
pub struct QueueSender<T> {
    inner: Option<mpsc::Sender<T>>,
}

impl<T> QueueSender<T> {
    /// Send from a blocking thread, waiting for free capacity.
    pub fn send_blocking(&self, item: T) -> Result<(), QueueError> {
        let tx = self.inner.as_ref().ok_or(QueueError::Closed)?;
        tx.blocking_send(item).map_err(|_| QueueError::Disconnected)
    }

    /// Send from an async task, waiting for free capacity.
    pub async fn send(&self, item: T) -> Result<(), QueueError> {
        let tx = self.inner.as_ref().ok_or(QueueError::Closed)?;
        tx.send(item).await.map_err(|_| QueueError::Disconnected)
    }

    /// Close the queue. Calling this more than once has no further effect.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            log::debug!("pipeline queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

/// Consuming half, shared by all workers.
pub struct QueueReceiver<T> {
    inner: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> QueueReceiver<T> {
    /// Wait for the next item; `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<T> {
        self.inner.lock().await.recv().await
    }
}

pub type BatchSender = QueueSender<MessageBatch>;
pub type BatchReceiver = QueueReceiver<MessageBatch>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (mut tx, _rx) = PipelineQueue::bounded::<u32>(1);
        tx.close();
        tx.close();
        assert!(tx.is_closed());
        assert_eq!(tx.send(1).await, Err(QueueError::Closed));
        assert_eq!(tx.send_blocking(1), Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn test_consumers_drain_after_close() {
        let (mut tx, rx) = PipelineQueue::bounded::<u32>(4);
        for i in 0..3 {
            tx.send(i).await.unwrap();
        }
        tx.close();

        assert_eq!(rx.recv().await, Some(0));
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, None);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_send_without_consumers_is_disconnected() {
        let (tx, rx) = PipelineQueue::bounded::<u32>(1);
        drop(rx);
        assert_eq!(tx.send(1).await, Err(QueueError::Disconnected));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_queue_blocks_producer() {
        let (mut tx, rx) = PipelineQueue::bounded::<u32>(1);

        let producer = tokio::task::spawn_blocking(move || {
            tx.send_blocking(1).unwrap();
            tx.send_blocking(2).unwrap();
            tx.close();
        });

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(!producer.is_finished(), "second send must wait for a consumer");

        assert_eq!(rx.recv().await, Some(1));
        tokio::time::timeout(std::time::Duration::from_secs(5), producer)
            .await
            .expect("producer resumes once capacity frees up")
            .unwrap();

        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_item_delivered_exactly_once() {
        let (mut tx, rx) = PipelineQueue::bounded::<u32>(1);

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Some(item) = rx.recv().await {
                        seen.push(item);
                    }
                    seen
                })
            })
            .collect();
        drop(rx);

        let producer = tokio::task::spawn_blocking(move || {
            for i in 0..200 {
                tx.send_blocking(i).unwrap();
            }
            tx.close();
        });
        producer.await.unwrap();

        let mut all = Vec::new();
        for consumer in consumers {
            let seen = consumer.await.unwrap();
            assert!(seen.windows(2).all(|w| w[0] < w[1]), "per-consumer FIFO");
            all.extend(seen);
        }

        assert_eq!(all.len(), 200);
        let unique: HashSet<_> = all.into_iter().collect();
        assert_eq!(unique.len(), 200);
    }
}
