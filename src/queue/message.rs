//! Collected sample messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::plc::Value;

/// How a message is applied to the primary store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Operation {
    /// Append a new row.
    Insert,
    /// Overwrite columns on the row identified by the key columns.
    Update,
}

/// One collected sample on its way to the primary store.
///
/// Column order is the channel's register declaration order and is preserved
/// through serialization, so a WAL round-trip reproduces the row shape
/// exactly. A message is destroyed only after it has reached the store or
/// the WAL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataMessage {
    /// Destination table.
    pub table: String,
    /// Ordered column -> value pairs.
    pub columns: Vec<(String, Value)>,
    pub operation: Operation,
    /// Key columns identifying the target row for `Update`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<(String, Value)>,
    /// Collection timestamp.
    pub ts: DateTime<Utc>,
    /// Batch threshold carried from the originating channel; `<= 1` means
    /// the message is written singly.
    pub batch_size: usize,
    /// Originating device, for metric tagging.
    pub plc_code: String,
    /// Originating channel, for metric tagging.
    pub channel: String,
}

impl DataMessage {
    /// New insert message for a channel's table.
    pub fn insert(
        table: impl Into<String>,
        plc_code: impl Into<String>,
        channel: impl Into<String>,
        batch_size: usize,
        columns: Vec<(String, Value)>,
    ) -> Self {
        Self {
            table: table.into(),
            columns,
            operation: Operation::Insert,
            keys: Vec::new(),
            ts: Utc::now(),
            batch_size,
            plc_code: plc_code.into(),
            channel: channel.into(),
        }
    }

    /// New keyed update message. Updates bypass batching.
    pub fn update(
        table: impl Into<String>,
        plc_code: impl Into<String>,
        channel: impl Into<String>,
        columns: Vec<(String, Value)>,
        keys: Vec<(String, Value)>,
    ) -> Self {
        Self {
            table: table.into(),
            columns,
            operation: Operation::Update,
            keys,
            ts: Utc::now(),
            batch_size: 1,
            plc_code: plc_code.into(),
            channel: channel.into(),
        }
    }

    /// Value of a column, if present.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }
}
