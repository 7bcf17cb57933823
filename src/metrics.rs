//! Metrics emission capability.
//!
//! The pipeline produces counters and latency observations to an injected
//! [`MetricsSink`]; wiring them into Prometheus or another backend is the
//! host application's concern. [`LogSink`] emits structured tracing events,
//! which is what the bundled binary uses.

use std::time::Duration;

/// Receives pipeline measurements.
///
/// Every method has an empty default so sinks only implement what they
/// consume; `()` is a valid no-op sink for tests.
pub trait MetricsSink: Send + Sync {
    /// One collection cycle completed for a device channel.
    fn collection_latency(&self, _plc_code: &str, _channel: &str, _elapsed: Duration) {}

    /// Rows emitted by a collection cycle.
    fn collection_count(&self, _plc_code: &str, _channel: &str, _rows: usize) {}

    /// Dispatch queue depth after a publish or consume.
    fn queue_depth(&self, _depth: u64) {}

    /// Time spent handling one message in the consumer loop.
    fn processing_latency(&self, _elapsed: Duration) {}

    /// One store write completed; `batched` is the number of rows written.
    fn write_latency(&self, _table: &str, _elapsed: Duration, _batched: usize) {}

    /// Messages diverted to the WAL after a store failure.
    fn wal_fallback(&self, _table: &str, _messages: usize) {}

    /// Pending WAL files observed by a retry scan.
    fn wal_pending(&self, _files: usize) {}

    /// An error occurred at `stage` for the given device/channel.
    fn error(&self, _plc_code: &str, _channel: &str, _stage: &str) {}

    /// A device transitioned between healthy and unhealthy.
    fn connection_changed(&self, _plc_code: &str, _connected: bool) {}

    /// How long a device stayed healthy before a transition to unhealthy.
    fn connection_duration(&self, _plc_code: &str, _duration: Duration) {}
}

/// No-op sink.
impl MetricsSink for () {}

/// Sink that emits every observation as a structured tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn collection_latency(&self, plc_code: &str, channel: &str, elapsed: Duration) {
        tracing::debug!(plc_code, channel, elapsed_ms = elapsed.as_millis() as u64, "collection latency");
    }

    fn collection_count(&self, plc_code: &str, channel: &str, rows: usize) {
        tracing::debug!(plc_code, channel, rows, "collection count");
    }

    fn queue_depth(&self, depth: u64) {
        tracing::trace!(depth, "queue depth");
    }

    fn processing_latency(&self, elapsed: Duration) {
        tracing::trace!(elapsed_us = elapsed.as_micros() as u64, "processing latency");
    }

    fn write_latency(&self, table: &str, elapsed: Duration, batched: usize) {
        tracing::debug!(table, elapsed_ms = elapsed.as_millis() as u64, batched, "store write");
    }

    fn wal_fallback(&self, table: &str, messages: usize) {
        tracing::warn!(table, messages, "messages diverted to WAL");
    }

    fn wal_pending(&self, files: usize) {
        tracing::info!(files, "WAL files pending");
    }

    fn error(&self, plc_code: &str, channel: &str, stage: &str) {
        tracing::debug!(plc_code, channel, stage, "error counted");
    }

    fn connection_changed(&self, plc_code: &str, connected: bool) {
        tracing::info!(plc_code, connected, "connection state changed");
    }

    fn connection_duration(&self, plc_code: &str, duration: Duration) {
        tracing::info!(plc_code, secs = duration.as_secs(), "connection duration");
    }
}
