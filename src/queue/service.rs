//! Dispatch queue with per-table batching.
//!
//! Multi-producer, single-consumer, unbounded and FIFO. Producers never
//! block; backpressure is observed through the depth metric rather than
//! enforced. The consumer loop is the durability boundary: every message it
//! takes off the queue reaches either the primary store or the WAL before
//! its handling completes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use super::message::{DataMessage, Operation};
use crate::metrics::MetricsSink;
use crate::store::PrimaryStore;
use crate::wal::WalStorage;

/// Errors from the queue surface.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The consumer has exited and the channel is closed.
    #[error("queue is closed")]
    Closed,

    /// `run` was called while a consumer is (or was) already running.
    #[error("consumer already taken")]
    ConsumerTaken,
}

pub struct QueueService {
    tx: UnboundedSender<DataMessage>,
    rx: Mutex<Option<UnboundedReceiver<DataMessage>>>,
    depth: AtomicU64,
    store: Arc<dyn PrimaryStore>,
    wal: Arc<WalStorage>,
    metrics: Arc<dyn MetricsSink>,
}

impl QueueService {
    pub fn new(
        store: Arc<dyn PrimaryStore>,
        wal: Arc<WalStorage>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            depth: AtomicU64::new(0),
            store,
            wal,
            metrics,
        }
    }

    /// Enqueue one message without blocking.
    pub fn publish(&self, message: DataMessage) -> Result<(), QueueError> {
        // Count before sending so the consumer's decrement can never race
        // the gauge below zero.
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        if self.tx.send(message).is_err() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            return Err(QueueError::Closed);
        }
        self.metrics.queue_depth(depth);
        Ok(())
    }

    /// Messages currently queued and not yet consumed.
    pub fn depth(&self) -> u64 {
        self.depth.load(Ordering::Relaxed)
    }

    /// Run the consumer loop until cancelled.
    ///
    /// On cancellation the loop first drains everything already published,
    /// then flushes any non-empty per-table buffers (store first, WAL on
    /// failure) before returning. Can only be called once per service.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), QueueError> {
        let mut rx = self
            .rx
            .lock()
            .expect("receiver slot poisoned")
            .take()
            .ok_or(QueueError::ConsumerTaken)?;

        tracing::info!("Queue consumer started");
        let mut buffers: HashMap<String, Vec<DataMessage>> = HashMap::new();

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => {
                        self.note_consumed();
                        self.dispatch(message, &mut buffers).await;
                    }
                    None => break,
                },
                _ = cancel.cancelled() => {
                    // Producers are stopped first on shutdown; whatever is
                    // already queued still gets its durability guarantee.
                    while let Ok(message) = rx.try_recv() {
                        self.note_consumed();
                        self.dispatch(message, &mut buffers).await;
                    }
                    break;
                }
            }
        }

        for (_, batch) in buffers.drain() {
            if !batch.is_empty() {
                self.flush_batch(batch).await;
            }
        }
        tracing::info!("Queue consumer stopped");
        Ok(())
    }

    fn note_consumed(&self) {
        let depth = self.depth.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        self.metrics.queue_depth(depth);
    }

    async fn dispatch(&self, message: DataMessage, buffers: &mut HashMap<String, Vec<DataMessage>>) {
        let started = Instant::now();
        match message.operation {
            Operation::Update => self.write_update(message).await,
            Operation::Insert if message.batch_size <= 1 => self.write_single(message).await,
            Operation::Insert => {
                let threshold = message.batch_size;
                let buffer = buffers.entry(message.table.clone()).or_default();
                buffer.push(message);
                if buffer.len() >= threshold {
                    let batch = std::mem::take(buffer);
                    self.flush_batch(batch).await;
                }
            }
        }
        self.metrics.processing_latency(started.elapsed());
    }

    async fn write_update(&self, message: DataMessage) {
        let started = Instant::now();
        let result = self
            .store
            .update_by_key(&message.table, &message.columns, &message.keys)
            .await;
        self.metrics
            .write_latency(&message.table, started.elapsed(), 1);

        if let Err(e) = result {
            tracing::warn!(table = %message.table, error = %e, "Keyed update failed, writing to WAL");
            self.divert(vec![message]).await;
        }
    }

    async fn write_single(&self, message: DataMessage) {
        let started = Instant::now();
        let result = self.store.save_single(&message).await;
        self.metrics
            .write_latency(&message.table, started.elapsed(), 1);

        if let Err(e) = result {
            tracing::warn!(table = %message.table, error = %e, "Single write failed, writing to WAL");
            self.divert(vec![message]).await;
        }
    }

    async fn flush_batch(&self, batch: Vec<DataMessage>) {
        let table = batch[0].table.clone();
        let started = Instant::now();
        let result = self.store.save_batch(&batch).await;
        self.metrics
            .write_latency(&table, started.elapsed(), batch.len());

        if let Err(e) = result {
            tracing::warn!(table = %table, messages = batch.len(), error = %e, "Batch write failed, writing to WAL");
            self.divert(batch).await;
        }
    }

    /// WAL fallback. This is the last line of the durability guarantee; a
    /// WAL failure here means the disk itself is gone, which is logged at
    /// error level and surfaced through metrics.
    async fn divert(&self, batch: Vec<DataMessage>) {
        let table = batch[0].table.clone();
        self.metrics.wal_fallback(&table, batch.len());
        if let Err(e) = self.wal.write(&batch).await {
            tracing::error!(table = %table, messages = batch.len(), error = %e, "WAL write failed, data lost");
        }
    }
}

impl std::fmt::Debug for QueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueService")
            .field("depth", &self.depth())
            .finish_non_exhaustive()
    }
}
