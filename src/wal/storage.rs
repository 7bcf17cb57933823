//! File-based write-ahead log.
//!
//! Each batch that fails to reach the primary store is serialized to one
//! file in the pending directory. File names carry a zero-padded timestamp
//! plus a process-monotonic sequence, so lexicographic order is arrival
//! order. Files are written to a temporary name and renamed into place, so
//! the retry worker never observes a partially written batch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use thiserror::Error;

use crate::queue::DataMessage;

const WAL_EXTENSION: &str = "wal";
const TMP_EXTENSION: &str = "tmp";

/// Errors from WAL file operations.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("wal i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct WalStorage {
    dir: PathBuf,
    seq: AtomicU64,
}

impl WalStorage {
    /// Open (creating if needed) the pending directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, WalError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            seq: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn next_file_name(&self) -> String {
        let micros = Utc::now().timestamp_micros().max(0);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{micros:020}-{seq:06}.{WAL_EXTENSION}")
    }

    /// Persist one batch; returns the path of the new pending file.
    pub async fn write(&self, batch: &[DataMessage]) -> Result<PathBuf, WalError> {
        let name = self.next_file_name();
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!("{name}.{TMP_EXTENSION}"));

        let encoded = serde_json::to_vec(batch)?;
        tokio::fs::write(&tmp, &encoded).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(file = %path.display(), messages = batch.len(), "WAL batch written");
        Ok(path)
    }

    /// Decode a pending file back into its batch.
    pub async fn read(&self, path: &Path) -> Result<Vec<DataMessage>, WalError> {
        let raw = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Remove a delivered file. Removing a file that is already gone is Ok.
    pub async fn delete(&self, path: &Path) -> Result<(), WalError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WalError::Io(e)),
        }
    }

    /// Pending files in arrival order.
    pub async fn pending(&self) -> Result<Vec<PathBuf>, WalError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(WAL_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Number of pending files.
    pub async fn pending_count(&self) -> Result<usize, WalError> {
        Ok(self.pending().await?.len())
    }
}

impl std::fmt::Debug for WalStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalStorage")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::Value;
    use crate::queue::Operation;
    use tempfile::tempdir;

    fn batch(n: usize) -> Vec<DataMessage> {
        (0..n)
            .map(|i| {
                DataMessage::insert(
                    "boiler",
                    "plc-1",
                    "ch-1",
                    n,
                    vec![
                        ("seq".to_string(), Value::U32(i as u32)),
                        ("temp".to_string(), Value::F64(20.5 + i as f64)),
                    ],
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_round_trip_is_lossless() {
        let dir = tempdir().unwrap();
        let wal = WalStorage::new(dir.path()).unwrap();

        let mut original = batch(3);
        original.push(DataMessage::update(
            "setpoints",
            "plc-1",
            "ch-1",
            vec![("target".to_string(), Value::F64(99.0))],
            vec![("zone".to_string(), Value::Str("a".into()))],
        ));

        let path = wal.write(&original).await.unwrap();
        let decoded = wal.read(&path).await.unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded[3].operation, Operation::Update);
    }

    #[tokio::test]
    async fn test_pending_preserves_arrival_order() {
        let dir = tempdir().unwrap();
        let wal = WalStorage::new(dir.path()).unwrap();

        let first = wal.write(&batch(1)).await.unwrap();
        let second = wal.write(&batch(1)).await.unwrap();
        let third = wal.write(&batch(1)).await.unwrap();

        assert_eq!(wal.pending().await.unwrap(), vec![first, second, third]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let wal = WalStorage::new(dir.path()).unwrap();

        let path = wal.write(&batch(2)).await.unwrap();
        wal.delete(&path).await.unwrap();
        // Second delete of the same file must not error or recreate it.
        wal.delete(&path).await.unwrap();
        assert_eq!(wal.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tmp_files_are_not_pending() {
        let dir = tempdir().unwrap();
        let wal = WalStorage::new(dir.path()).unwrap();

        tokio::fs::write(dir.path().join("000-000.wal.tmp"), b"partial")
            .await
            .unwrap();
        assert_eq!(wal.pending_count().await.unwrap(), 0);
    }
}
