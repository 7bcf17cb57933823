//! Pipeline assembly and lifecycle.
//!
//! Wires the acquisition service, dispatch queue, heartbeat monitor, and
//! WAL retry worker together, and owns their start/stop order. Background
//! loops are spawned by an explicit [`Pipeline::start`], never as a side
//! effect of construction, so lifetime is visible and testable.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::acquire::{AcquisitionService, CycleTracker};
use crate::config::AppConfig;
use crate::metrics::{LogSink, MetricsSink};
use crate::plc::{ClientLifecycle, HeartbeatMonitor, PlcClientFactory};
use crate::queue::{QueueError, QueueService};
use crate::store::PrimaryStore;
use crate::wal::{WalError, WalRetryWorker, WalStorage};

/// Builder for the full edge pipeline.
pub struct PipelineBuilder {
    config: AppConfig,
    factory: Arc<dyn PlcClientFactory>,
    store: Arc<dyn PrimaryStore>,
    metrics: Arc<dyn MetricsSink>,
}

impl PipelineBuilder {
    pub fn new(
        config: AppConfig,
        factory: Arc<dyn PlcClientFactory>,
        store: Arc<dyn PrimaryStore>,
    ) -> Self {
        Self {
            config,
            factory,
            store,
            metrics: Arc::new(LogSink),
        }
    }

    /// Replace the default tracing-backed metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Construct the pipeline. Nothing runs until [`Pipeline::start`].
    pub fn build(self) -> Result<Pipeline, WalError> {
        let wal = Arc::new(WalStorage::new(&self.config.wal.dir)?);
        let lifecycle = Arc::new(ClientLifecycle::new(Arc::clone(&self.factory)));
        let cycles = Arc::new(CycleTracker::new());

        let queue = Arc::new(QueueService::new(
            Arc::clone(&self.store),
            Arc::clone(&wal),
            Arc::clone(&self.metrics),
        ));
        let acquisition = Arc::new(AcquisitionService::new(
            &self.config,
            Arc::clone(&lifecycle),
            cycles,
            Arc::clone(&queue),
            Arc::clone(&self.metrics),
        ));
        let heartbeat = HeartbeatMonitor::new(
            lifecycle,
            Arc::clone(&self.metrics),
            self.config.heartbeat.interval,
            self.config.heartbeat.ping_timeout,
        );
        let retry = WalRetryWorker::new(
            Arc::clone(&wal),
            Arc::clone(&self.store),
            Arc::clone(&self.metrics),
            self.config.wal.retry_interval,
        );

        Ok(Pipeline {
            acquisition,
            queue,
            heartbeat: Arc::new(heartbeat),
            retry: Arc::new(retry),
            wal,
            workers: None,
        })
    }
}

struct Workers {
    queue_cancel: CancellationToken,
    queue_task: JoinHandle<Result<(), QueueError>>,
    heartbeat_cancel: CancellationToken,
    heartbeat_task: JoinHandle<()>,
    retry_cancel: CancellationToken,
    retry_task: JoinHandle<()>,
}

/// The assembled pipeline and its background loops.
pub struct Pipeline {
    /// Polling loops, status queries, and the ad-hoc write path.
    pub acquisition: Arc<AcquisitionService>,
    queue: Arc<QueueService>,
    heartbeat: Arc<HeartbeatMonitor>,
    retry: Arc<WalRetryWorker>,
    wal: Arc<WalStorage>,
    workers: Option<Workers>,
}

impl Pipeline {
    /// The dispatch queue, for hosts that publish their own messages.
    pub fn queue(&self) -> &Arc<QueueService> {
        &self.queue
    }

    /// The WAL, for observability (pending file count).
    pub fn wal(&self) -> &Arc<WalStorage> {
        &self.wal
    }

    /// Spawn the consumer, heartbeat, and retry loops, then start polling.
    ///
    /// Calling `start` on a running pipeline is a no-op.
    pub async fn start(&mut self) {
        if self.workers.is_some() {
            tracing::debug!("Pipeline already started");
            return;
        }

        let queue_cancel = CancellationToken::new();
        let queue_task = {
            let queue = Arc::clone(&self.queue);
            let cancel = queue_cancel.clone();
            tokio::spawn(async move { queue.run(cancel).await })
        };

        let heartbeat_cancel = CancellationToken::new();
        let heartbeat_task = {
            let heartbeat = Arc::clone(&self.heartbeat);
            let cancel = heartbeat_cancel.clone();
            tokio::spawn(async move { heartbeat.run(cancel).await })
        };

        let retry_cancel = CancellationToken::new();
        let retry_task = {
            let retry = Arc::clone(&self.retry);
            let cancel = retry_cancel.clone();
            tokio::spawn(async move { retry.run(cancel).await })
        };

        self.workers = Some(Workers {
            queue_cancel,
            queue_task,
            heartbeat_cancel,
            heartbeat_task,
            retry_cancel,
            retry_task,
        });

        self.acquisition.start_collection_tasks().await;
        tracing::info!("Pipeline started");
    }

    /// Stop everything in dependency order: producers first, then the queue
    /// consumer (which flushes its buffers), then the retry worker.
    pub async fn shutdown(mut self) {
        self.acquisition.stop_collection_tasks().await;

        if let Some(workers) = self.workers.take() {
            workers.heartbeat_cancel.cancel();
            let _ = workers.heartbeat_task.await;

            workers.queue_cancel.cancel();
            match workers.queue_task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Queue consumer failed"),
                Err(e) => tracing::error!(error = %e, "Queue consumer panicked"),
            }

            workers.retry_cancel.cancel();
            let _ = workers.retry_task.await;
        }
        tracing::info!("Pipeline stopped");
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("running", &self.workers.is_some())
            .finish_non_exhaustive()
    }
}
