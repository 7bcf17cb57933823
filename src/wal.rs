//! Durability Layer
//!
//! When the primary store refuses a write, the affected batch lands in a
//! file-based write-ahead log instead of being dropped. A background worker
//! replays pending files once the store recovers.
//!
//! # Components
//!
//! - [`WalStorage`]: one file per batch, name-ordered, atomic rename on write
//! - [`WalRetryWorker`]: periodic replay loop, per-file independence
//!
//! The directory is safe with a single retry worker instance: the queue
//! consumer only ever adds new files, and a file is deleted only after a
//! full read plus a confirmed store write.

mod retry;
mod storage;

pub use retry::{ScanOutcome, WalRetryWorker};
pub use storage::{WalError, WalStorage};
