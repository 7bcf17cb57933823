//! WAL retry worker.
//!
//! A background loop that periodically replays pending WAL files into the
//! primary store. Files are processed independently: one file's failure
//! leaves it for the next scan without blocking the rest. The worker
//! tolerates the store being down for arbitrarily long; pending files just
//! accumulate and the count is reported as a metric.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::storage::WalStorage;
use crate::metrics::MetricsSink;
use crate::store::PrimaryStore;

/// Result of one scan over the pending directory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Files replayed into the store and deleted.
    pub replayed: usize,
    /// Files left in place for the next scan.
    pub left: usize,
    /// Corrupt or empty files deleted without replay.
    pub purged: usize,
}

pub struct WalRetryWorker {
    wal: Arc<WalStorage>,
    store: Arc<dyn PrimaryStore>,
    metrics: Arc<dyn MetricsSink>,
    interval: Duration,
}

impl WalRetryWorker {
    pub fn new(
        wal: Arc<WalStorage>,
        store: Arc<dyn PrimaryStore>,
        metrics: Arc<dyn MetricsSink>,
        interval: Duration,
    ) -> Self {
        Self {
            wal,
            store,
            metrics,
            interval,
        }
    }

    /// Run the retry loop until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(interval = ?self.interval, dir = %self.wal.dir().display(), "WAL retry worker started");
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let outcome = self.scan().await;
                    if outcome != ScanOutcome::default() {
                        tracing::info!(
                            replayed = outcome.replayed,
                            left = outcome.left,
                            purged = outcome.purged,
                            "WAL scan finished"
                        );
                    }
                }
            }
        }
        tracing::info!("WAL retry worker stopped");
    }

    /// Scan the pending directory once and replay what can be replayed.
    pub async fn scan(&self) -> ScanOutcome {
        let pending = match self.wal.pending().await {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(error = %e, "WAL scan failed to list pending files");
                return ScanOutcome::default();
            }
        };
        self.metrics.wal_pending(pending.len());

        let mut outcome = ScanOutcome::default();
        for path in pending {
            match self.wal.read(&path).await {
                Ok(batch) if batch.is_empty() => {
                    // Nothing recoverable; keeping the file would retry forever.
                    tracing::warn!(file = %path.display(), "Empty WAL file, deleting");
                    self.purge(&path).await;
                    outcome.purged += 1;
                }
                Ok(batch) => match self.store.save_batch(&batch).await {
                    Ok(()) => {
                        if let Err(e) = self.wal.delete(&path).await {
                            tracing::error!(file = %path.display(), error = %e, "Failed to delete replayed WAL file");
                        }
                        tracing::debug!(file = %path.display(), messages = batch.len(), "WAL batch replayed");
                        outcome.replayed += 1;
                    }
                    Err(e) => {
                        tracing::debug!(file = %path.display(), error = %e, "Store still failing, leaving WAL file");
                        outcome.left += 1;
                    }
                },
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Corrupt WAL file, deleting");
                    self.purge(&path).await;
                    outcome.purged += 1;
                }
            }
        }
        outcome
    }

    async fn purge(&self, path: &std::path::Path) {
        if let Err(e) = self.wal.delete(path).await {
            tracing::error!(file = %path.display(), error = %e, "Failed to delete WAL file");
        }
    }
}
