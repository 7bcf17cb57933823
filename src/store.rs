//! Primary store capability.
//!
//! The time-series store is an external collaborator: the pipeline only
//! needs single/batch writes and keyed updates, all of which may fail. The
//! bundled [`MemoryStore`] implements the trait over process memory with a
//! scriptable failure switch; real deployments inject their own client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::plc::Value;
use crate::queue::DataMessage;

/// Errors reported by the primary store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store rejected or failed the write.
    #[error("store write failed: {0}")]
    Write(String),

    /// The store did not answer in time.
    #[error("store timed out")]
    Timeout,
}

/// Batch/single write and keyed update against the primary store.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    async fn save_single(&self, message: &DataMessage) -> Result<(), StoreError>;

    async fn save_batch(&self, messages: &[DataMessage]) -> Result<(), StoreError>;

    async fn update_by_key(
        &self,
        table: &str,
        values: &[(String, Value)],
        keys: &[(String, Value)],
    ) -> Result<(), StoreError>;
}

/// A recorded keyed update.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUpdate {
    pub table: String,
    pub values: Vec<(String, Value)>,
    pub keys: Vec<(String, Value)>,
}

/// In-memory store with a failure switch.
///
/// Rows are kept per table in arrival order; counters expose how writes
/// arrived (singly or batched), which the batching tests assert on.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<String, Vec<DataMessage>>>,
    updates: Mutex<Vec<RecordedUpdate>>,
    failing: AtomicBool,
    single_writes: AtomicU64,
    batch_writes: AtomicU64,
    update_writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn is_failing(&self) -> bool {
        self.failing.load(Ordering::Relaxed)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.is_failing() {
            return Err(StoreError::Write("store unavailable".to_string()));
        }
        Ok(())
    }

    /// Rows stored for `table`, in arrival order.
    pub fn rows(&self, table: &str) -> Vec<DataMessage> {
        self.rows
            .lock()
            .expect("row store poisoned")
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Total rows across all tables.
    pub fn total_rows(&self) -> usize {
        self.rows
            .lock()
            .expect("row store poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Keyed updates applied so far.
    pub fn recorded_updates(&self) -> Vec<RecordedUpdate> {
        self.updates.lock().expect("update log poisoned").clone()
    }

    pub fn single_writes(&self) -> u64 {
        self.single_writes.load(Ordering::Relaxed)
    }

    pub fn batch_writes(&self) -> u64 {
        self.batch_writes.load(Ordering::Relaxed)
    }

    pub fn update_writes(&self) -> u64 {
        self.update_writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PrimaryStore for MemoryStore {
    async fn save_single(&self, message: &DataMessage) -> Result<(), StoreError> {
        self.check_available()?;
        self.single_writes.fetch_add(1, Ordering::Relaxed);
        self.rows
            .lock()
            .expect("row store poisoned")
            .entry(message.table.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn save_batch(&self, messages: &[DataMessage]) -> Result<(), StoreError> {
        self.check_available()?;
        if messages.is_empty() {
            return Ok(());
        }
        self.batch_writes.fetch_add(1, Ordering::Relaxed);
        let mut rows = self.rows.lock().expect("row store poisoned");
        for message in messages {
            rows.entry(message.table.clone())
                .or_default()
                .push(message.clone());
        }
        Ok(())
    }

    async fn update_by_key(
        &self,
        table: &str,
        values: &[(String, Value)],
        keys: &[(String, Value)],
    ) -> Result<(), StoreError> {
        self.check_available()?;
        self.update_writes.fetch_add(1, Ordering::Relaxed);
        self.updates
            .lock()
            .expect("update log poisoned")
            .push(RecordedUpdate {
                table: table.to_string(),
                values: values.to_vec(),
                keys: keys.to_vec(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(table: &str) -> DataMessage {
        DataMessage::insert(
            table,
            "plc-1",
            "ch-1",
            1,
            vec![("v".to_string(), Value::U16(1))],
        )
    }

    #[tokio::test]
    async fn test_writes_accumulate_per_table() {
        let store = MemoryStore::new();
        store.save_single(&message("a")).await.unwrap();
        store
            .save_batch(&[message("a"), message("b")])
            .await
            .unwrap();

        assert_eq!(store.rows("a").len(), 2);
        assert_eq!(store.rows("b").len(), 1);
        assert_eq!(store.single_writes(), 1);
        assert_eq!(store.batch_writes(), 1);
    }

    #[tokio::test]
    async fn test_failure_switch() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(store.save_single(&message("a")).await.is_err());
        assert!(store.save_batch(&[message("a")]).await.is_err());
        assert_eq!(store.total_rows(), 0);

        store.set_failing(false);
        assert!(store.save_single(&message("a")).await.is_ok());
        assert_eq!(store.total_rows(), 1);
    }

    #[tokio::test]
    async fn test_update_recorded() {
        let store = MemoryStore::new();
        store
            .update_by_key(
                "setpoints",
                &[("target".to_string(), Value::F64(1.0))],
                &[("zone".to_string(), Value::Str("a".into()))],
            )
            .await
            .unwrap();

        let updates = store.recorded_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].table, "setpoints");
        assert_eq!(store.update_writes(), 1);
    }
}
