//! Acquisition cycle tracking.
//!
//! A cycle brackets one timed collection attempt for a (device, channel,
//! measurement) key, so collection latency can be measured across the
//! read/decode/enqueue path. State is purely in-memory and vanishes on
//! restart.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One timed collection attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionCycle {
    pub id: Uuid,
    pub plc_code: String,
    pub channel: String,
    pub measurement: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl AcquisitionCycle {
    /// Wall-clock duration of a closed cycle.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

type CycleKey = (String, String, String);

/// Tracks the open cycle per (device, channel, measurement) key.
///
/// Starting a cycle while one is open for the same key replaces it
/// (last-start-wins); the replaced cycle's latency measurement is lost.
#[derive(Default)]
pub struct CycleTracker {
    open: Mutex<HashMap<CycleKey, AcquisitionCycle>>,
}

impl CycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new cycle, replacing any open cycle for the same key.
    pub fn start_cycle(
        &self,
        plc_code: &str,
        channel: &str,
        measurement: &str,
    ) -> AcquisitionCycle {
        let cycle = AcquisitionCycle {
            id: Uuid::new_v4(),
            plc_code: plc_code.to_string(),
            channel: channel.to_string(),
            measurement: measurement.to_string(),
            started_at: Utc::now(),
            ended_at: None,
        };

        let key = (
            plc_code.to_string(),
            channel.to_string(),
            measurement.to_string(),
        );
        let replaced = self
            .open
            .lock()
            .expect("cycle map poisoned")
            .insert(key, cycle.clone());
        if let Some(old) = replaced {
            tracing::debug!(
                plc_code,
                channel,
                measurement,
                replaced_id = %old.id,
                "Open cycle replaced"
            );
        }
        cycle
    }

    /// Close and remove the open cycle for a key.
    ///
    /// Returns `None` when no cycle is open, which callers treat as "no
    /// latency sample this round".
    pub fn end_cycle(
        &self,
        plc_code: &str,
        channel: &str,
        measurement: &str,
    ) -> Option<AcquisitionCycle> {
        let key = (
            plc_code.to_string(),
            channel.to_string(),
            measurement.to_string(),
        );
        let mut cycle = self.open.lock().expect("cycle map poisoned").remove(&key)?;
        cycle.ended_at = Some(Utc::now());
        Some(cycle)
    }

    /// Number of currently open cycles.
    pub fn open_count(&self) -> usize {
        self.open.lock().expect("cycle map poisoned").len()
    }
}
