//! Dispatch Layer
//!
//! In-process FIFO queue between the per-device collectors and the primary
//! store. Producers publish without blocking; a single consumer accumulates
//! per-table batches and owns the store-or-WAL durability decision.
//!
//! # Components
//!
//! - [`DataMessage`] / [`Operation`]: one collected sample and how it is applied
//! - [`QueueService`]: publish surface plus the consumer loop

mod message;
mod service;

pub use message::{DataMessage, Operation};
pub use service::{QueueError, QueueService};
