//! Sluice - Edge Acquisition Gateway
//!
//! Polls register groups from industrial controllers on per-device loops,
//! applies per-column expression transforms, and durably delivers rows to a
//! primary time-series store. Store outages divert batches to a file-based
//! WAL that a background worker replays once the store recovers, so no
//! collected sample is ever silently dropped.
//!
//! # Architecture
//!
//! - **plc**: typed values, byte transcoding, the protocol client
//!   capability, per-device lifecycle, heartbeat monitor
//! - **acquire**: polling orchestration, channel collection, expression
//!   transforms, cycle tracking
//! - **queue**: in-process FIFO dispatch with per-table batching
//! - **wal**: file-based durability fallback and the retry worker
//! - **store**: primary store capability (injected by the host)
//! - **metrics**: metrics sink capability (injected by the host)
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sluice::{AppConfig, MemoryStore, MockPlcFactory, PipelineBuilder};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load("configs/config.yaml")?;
//! let mut pipeline = PipelineBuilder::new(
//!     config,
//!     Arc::new(MockPlcFactory::new()),
//!     Arc::new(MemoryStore::new()),
//! )
//! .build()?;
//!
//! pipeline.start().await;
//! // ... run until shutdown signal ...
//! pipeline.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod acquire;
pub mod config;
pub mod metrics;
pub mod plc;
pub mod queue;
pub mod runtime;
pub mod store;
pub mod wal;

// Re-export core types at crate root for convenience
pub use acquire::{AcquisitionCycle, AcquisitionService, CycleTracker, WriteOutcome};
pub use config::{AppConfig, ChannelConfig, ConfigError, DeviceConfig, RegisterConfig};
pub use metrics::{LogSink, MetricsSink};
pub use plc::mock::{MockPlcFactory, MockPlcHandle};
pub use plc::{
    ClientLifecycle, DataType, HeartbeatMonitor, PlcClient, PlcClientFactory,
    PlcConnectionStatus, PlcError, Value,
};
pub use queue::{DataMessage, Operation, QueueService};
pub use runtime::{Pipeline, PipelineBuilder};
pub use store::{MemoryStore, PrimaryStore, StoreError};
pub use wal::{WalRetryWorker, WalStorage};
