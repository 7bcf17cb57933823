//! Channel collection.
//!
//! One poll of one device channel: read every register, decode, apply the
//! per-register expression, shape the results into a [`DataMessage`], and
//! hand it to the dispatch queue. Register-level failures only drop their
//! own column; the row survives with whatever was read successfully.

use thiserror::Error;

use super::cycle::CycleTracker;
use super::eval::{apply_expression, EvalOutcome};
use crate::config::{ChannelConfig, DeviceConfig};
use crate::metrics::MetricsSink;
use crate::plc::{DeviceSlot, PlcError};
use crate::queue::{DataMessage, QueueError, QueueService};

/// Errors that abort a whole collection cycle.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Device-level failure; the orchestrator retries on the next tick.
    #[error(transparent)]
    Plc(#[from] PlcError),

    /// The dispatch queue has shut down.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Poll one channel once.
///
/// The device I/O lock is held for the read phase only; the enqueue happens
/// after it is released. Connection failures mark the device unhealthy and
/// abort the cycle; individual register failures are counted and their
/// columns omitted from the emitted row.
pub async fn collect_channel(
    device: &DeviceConfig,
    channel: &ChannelConfig,
    slot: &DeviceSlot,
    queue: &QueueService,
    cycles: &CycleTracker,
    metrics: &dyn MetricsSink,
) -> Result<(), AcquireError> {
    cycles.start_cycle(&device.plc_code, &channel.name, &channel.table);

    let mut columns = Vec::with_capacity(channel.registers.len());
    {
        let mut client = slot.client.lock().await;
        if let Err(e) = client.connect().await {
            slot.mark_unhealthy(e.to_string());
            metrics.error(&device.plc_code, &channel.name, "connect");
            return Err(e.into());
        }

        for register in &channel.registers {
            let read = client
                .read_value(
                    register.address,
                    register.read_length(),
                    register.data_type,
                    register.encoding,
                )
                .await;
            match read {
                Ok(raw) => {
                    let (value, outcome) = apply_expression(register.expression.as_deref(), &raw);
                    if outcome == EvalOutcome::KeptOriginal {
                        metrics.error(&device.plc_code, &channel.name, "eval");
                    }
                    columns.push((register.column.clone(), value));
                }
                Err(e) => {
                    tracing::warn!(
                        plc_code = %device.plc_code,
                        channel = %channel.name,
                        column = %register.column,
                        error = %e,
                        "Register read failed, column omitted"
                    );
                    metrics.error(&device.plc_code, &channel.name, "read");
                }
            }
        }
    }
    slot.mark_healthy();

    if columns.is_empty() {
        tracing::warn!(
            plc_code = %device.plc_code,
            channel = %channel.name,
            "Every register read failed, no row emitted"
        );
        metrics.error(&device.plc_code, &channel.name, "empty_row");
    } else {
        let message = DataMessage::insert(
            &channel.table,
            &device.plc_code,
            &channel.name,
            channel.batch_size,
            columns,
        );
        queue.publish(message)?;
        metrics.collection_count(&device.plc_code, &channel.name, 1);
    }

    if let Some(cycle) = cycles.end_cycle(&device.plc_code, &channel.name, &channel.table) {
        if let Some(elapsed) = cycle.elapsed().and_then(|d| d.to_std().ok()) {
            metrics.collection_latency(&device.plc_code, &channel.name, elapsed);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegisterConfig;
    use crate::plc::client::PlcClientFactory;
    use crate::plc::mock::{MockPlcFactory, MOCK_PROTOCOL};
    use crate::plc::{ClientLifecycle, DataType, StrEncoding, Value};
    use crate::store::{MemoryStore, PrimaryStore};
    use crate::wal::WalStorage;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    struct Fixture {
        device: DeviceConfig,
        factory: Arc<MockPlcFactory>,
        lifecycle: Arc<ClientLifecycle>,
        queue: Arc<QueueService>,
        cycles: CycleTracker,
        _dir: tempfile::TempDir,
    }

    fn register(column: &str, address: u16, expression: Option<&str>) -> RegisterConfig {
        RegisterConfig {
            column: column.to_string(),
            address,
            length: 0,
            data_type: DataType::Uint16,
            expression: expression.map(str::to_string),
            encoding: StrEncoding::Utf8,
        }
    }

    fn fixture(registers: Vec<RegisterConfig>) -> Fixture {
        let dir = tempdir().unwrap();
        let device = DeviceConfig {
            plc_code: "plc-1".to_string(),
            endpoint: "127.0.0.1:502".to_string(),
            protocol: MOCK_PROTOCOL.to_string(),
            enabled: true,
            channels: vec![ChannelConfig {
                name: "ch-1".to_string(),
                table: "boiler".to_string(),
                batch_size: 1,
                interval: Duration::from_secs(1),
                registers,
            }],
        };
        let factory = Arc::new(MockPlcFactory::new());
        let lifecycle = Arc::new(ClientLifecycle::new(
            Arc::clone(&factory) as Arc<dyn PlcClientFactory>
        ));
        let store = Arc::new(MemoryStore::new());
        let wal = Arc::new(WalStorage::new(dir.path()).unwrap());
        let queue = Arc::new(QueueService::new(
            store as Arc<dyn PrimaryStore>,
            wal,
            Arc::new(()),
        ));
        Fixture {
            device,
            factory,
            lifecycle,
            queue,
            cycles: CycleTracker::new(),
            _dir: dir,
        }
    }

    async fn collect(fixture: &Fixture) -> Result<(), AcquireError> {
        let slot = fixture
            .lifecycle
            .get_or_create(&fixture.device)
            .await
            .unwrap();
        collect_channel(
            &fixture.device,
            &fixture.device.channels[0],
            &slot,
            &fixture.queue,
            &fixture.cycles,
            &(),
        )
        .await
    }

    #[tokio::test]
    async fn test_collect_emits_row_in_declaration_order() {
        let fixture = fixture(vec![
            register("pressure", 100, None),
            register("temp", 102, Some("value / 10.0")),
        ]);
        let handle = fixture.factory.handle("plc-1");
        handle.set_register(100, &Value::U16(42));
        handle.set_register(102, &Value::U16(815));

        collect(&fixture).await.unwrap();
        assert_eq!(fixture.queue.depth(), 1);
        assert_eq!(fixture.cycles.open_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_register_is_omitted_not_zero_filled() {
        let fixture = fixture(vec![
            register("good", 100, None),
            register("bad", 102, None),
        ]);
        let handle = fixture.factory.handle("plc-1");
        handle.set_register(100, &Value::U16(7));
        handle.set_register(102, &Value::U16(9));
        handle.fail_reads_at(102);

        collect(&fixture).await.unwrap();
        // The row still went out with the one good column.
        assert_eq!(fixture.queue.depth(), 1);
    }

    #[tokio::test]
    async fn test_expression_failure_keeps_original_value() {
        let fixture = fixture(vec![
            register("scaled", 100, Some("value / nope")),
            register("plain", 102, None),
        ]);
        let handle = fixture.factory.handle("plc-1");
        handle.set_register(100, &Value::U16(7));
        handle.set_register(102, &Value::U16(3));

        collect(&fixture).await.unwrap();
        assert_eq!(fixture.queue.depth(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_device_aborts_cycle() {
        let fixture = fixture(vec![register("a", 100, None)]);
        fixture.factory.handle("plc-1").set_reachable(false);

        let err = collect(&fixture).await.unwrap_err();
        assert!(matches!(err, AcquireError::Plc(_)));
        assert_eq!(fixture.queue.depth(), 0);

        let slot = fixture.lifecycle.get("plc-1").await.unwrap();
        assert!(!slot.is_healthy());
        // The aborted cycle stays open until the next start replaces it.
        assert_eq!(fixture.cycles.open_count(), 1);
    }

    #[tokio::test]
    async fn test_all_registers_failing_emits_nothing() {
        let fixture = fixture(vec![register("a", 100, None)]);
        let handle = fixture.factory.handle("plc-1");
        handle.set_register(100, &Value::U16(1));
        handle.fail_reads_at(100);

        collect(&fixture).await.unwrap();
        assert_eq!(fixture.queue.depth(), 0);
    }
}
