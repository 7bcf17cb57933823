//! Acquisition orchestration.
//!
//! Owns one cancellable polling loop per enabled device. Loops run
//! independently: a device that cannot connect keeps retrying on its own
//! tick without affecting the others, and no iteration error ever
//! terminates a loop task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::collector::collect_channel;
use super::cycle::CycleTracker;
use crate::config::{AppConfig, DeviceConfig};
use crate::metrics::MetricsSink;
use crate::plc::{ClientLifecycle, DataType, PlcConnectionStatus, Value};
use crate::queue::QueueService;

/// Outcome of an ad-hoc register write.
#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub is_success: bool,
    pub message: String,
}

impl WriteOutcome {
    fn success() -> Self {
        Self {
            is_success: true,
            message: "ok".to_string(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            message: message.into(),
        }
    }
}

/// Per-device execution context: cancellation handle plus the loop task.
struct PlcRuntime {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Starts, supervises, and stops the per-device polling loops.
pub struct AcquisitionService {
    devices: Vec<Arc<DeviceConfig>>,
    lifecycle: Arc<ClientLifecycle>,
    cycles: Arc<CycleTracker>,
    queue: Arc<QueueService>,
    metrics: Arc<dyn MetricsSink>,
    runtimes: tokio::sync::Mutex<HashMap<String, PlcRuntime>>,
    shutdown_grace: Duration,
}

impl AcquisitionService {
    pub fn new(
        config: &AppConfig,
        lifecycle: Arc<ClientLifecycle>,
        cycles: Arc<CycleTracker>,
        queue: Arc<QueueService>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            // All configured devices are addressable for ad-hoc writes;
            // only enabled ones get polling loops.
            devices: config.devices.iter().cloned().map(Arc::new).collect(),
            lifecycle,
            cycles,
            queue,
            metrics,
            runtimes: tokio::sync::Mutex::new(HashMap::new()),
            shutdown_grace: config.acquisition.shutdown_grace,
        }
    }

    /// Spawn a polling loop for every enabled device that has none yet.
    ///
    /// Idempotent: devices already running are left alone.
    pub async fn start_collection_tasks(&self) {
        let mut runtimes = self.runtimes.lock().await;
        for device in &self.devices {
            if !device.enabled || runtimes.contains_key(&device.plc_code) {
                continue;
            }
            if device.channels.is_empty() {
                tracing::warn!(plc_code = %device.plc_code, "Device has no channels, not polling");
                continue;
            }

            let cancel = CancellationToken::new();
            let task = tokio::spawn(poll_loop(
                Arc::clone(device),
                Arc::clone(&self.lifecycle),
                Arc::clone(&self.cycles),
                Arc::clone(&self.queue),
                Arc::clone(&self.metrics),
                cancel.clone(),
            ));
            runtimes.insert(device.plc_code.clone(), PlcRuntime { cancel, task });
            tracing::info!(plc_code = %device.plc_code, "Polling loop started");
        }
    }

    /// Cancel every polling loop, wait for them to finish (bounded by the
    /// grace period), then close all device clients.
    pub async fn stop_collection_tasks(&self) {
        let runtimes: Vec<(String, PlcRuntime)> =
            self.runtimes.lock().await.drain().collect();
        for (_, runtime) in &runtimes {
            runtime.cancel.cancel();
        }
        for (plc_code, runtime) in runtimes {
            let abort = runtime.task.abort_handle();
            match tokio::time::timeout(self.shutdown_grace, runtime.task).await {
                Ok(_) => tracing::info!(%plc_code, "Polling loop stopped"),
                Err(_) => {
                    tracing::warn!(%plc_code, "Polling loop did not stop in time, aborting");
                    abort.abort();
                }
            }
        }
        self.lifecycle.close_all().await;
    }

    /// Number of polling loops currently running.
    pub async fn running_count(&self) -> usize {
        self.runtimes.lock().await.len()
    }

    /// Device-code-sorted connection status snapshot.
    pub async fn connections(&self) -> Vec<PlcConnectionStatus> {
        self.lifecycle.statuses().await
    }

    /// Out-of-band register write, bypassing the polling loop and the queue.
    ///
    /// Serializes against the device's other I/O through the same lock, so
    /// it can never race the polling loop on the connection. Failures are
    /// returned to the caller and never retried.
    pub async fn write_plc(
        &self,
        plc_code: &str,
        address: u16,
        raw_value: &str,
        data_type: DataType,
    ) -> WriteOutcome {
        let Some(device) = self.devices.iter().find(|d| d.plc_code == plc_code) else {
            return WriteOutcome::failure(format!("unknown device: {plc_code}"));
        };
        let value = match Value::parse(data_type, raw_value) {
            Ok(value) => value,
            Err(e) => return WriteOutcome::failure(e.to_string()),
        };
        let slot = match self.lifecycle.get_or_create(device).await {
            Ok(slot) => slot,
            Err(e) => return WriteOutcome::failure(e.to_string()),
        };

        let mut client = slot.client.lock().await;
        if let Err(e) = client.connect().await {
            slot.mark_unhealthy(e.to_string());
            return WriteOutcome::failure(e.to_string());
        }
        match client.write_value(address, value).await {
            Ok(()) => {
                slot.mark_healthy();
                WriteOutcome::success()
            }
            Err(e) => {
                self.metrics.error(plc_code, "", "write");
                WriteOutcome::failure(e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for AcquisitionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionService")
            .field("devices", &self.devices.len())
            .finish_non_exhaustive()
    }
}

/// One device's polling loop.
///
/// Ticks at the device's shortest channel interval and polls every channel
/// whose own interval has elapsed. Each iteration is fenced: errors are
/// logged and counted, never propagated out of the loop.
async fn poll_loop(
    device: Arc<DeviceConfig>,
    lifecycle: Arc<ClientLifecycle>,
    cycles: Arc<CycleTracker>,
    queue: Arc<QueueService>,
    metrics: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(device.min_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_run: HashMap<String, Instant> = HashMap::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = poll_once(&device, &lifecycle, &cycles, &queue, &*metrics, &mut last_run).await {
            tracing::warn!(plc_code = %device.plc_code, error = %e, "Poll iteration failed");
        }
    }
    tracing::debug!(plc_code = %device.plc_code, "Polling loop exiting");
}

async fn poll_once(
    device: &DeviceConfig,
    lifecycle: &ClientLifecycle,
    cycles: &CycleTracker,
    queue: &QueueService,
    metrics: &dyn MetricsSink,
    last_run: &mut HashMap<String, Instant>,
) -> Result<(), super::collector::AcquireError> {
    let slot = lifecycle.get_or_create(device).await?;

    for channel in &device.channels {
        let due = last_run
            .get(&channel.name)
            .map(|at| at.elapsed() >= channel.interval)
            .unwrap_or(true);
        if !due {
            continue;
        }
        // The attempt counts as a run whether or not it succeeds; the next
        // try waits for the channel interval again.
        last_run.insert(channel.name.clone(), Instant::now());
        collect_channel(device, channel, &slot, queue, cycles, metrics).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelConfig, RegisterConfig};
    use crate::plc::client::PlcClientFactory;
    use crate::plc::mock::{MockPlcFactory, MOCK_PROTOCOL};
    use crate::plc::StrEncoding;
    use crate::store::{MemoryStore, PrimaryStore};
    use crate::wal::WalStorage;
    use tempfile::tempdir;

    fn test_config(interval: Duration) -> AppConfig {
        let device = DeviceConfig {
            plc_code: "plc-1".to_string(),
            endpoint: "127.0.0.1:502".to_string(),
            protocol: MOCK_PROTOCOL.to_string(),
            enabled: true,
            channels: vec![ChannelConfig {
                name: "ch-1".to_string(),
                table: "boiler".to_string(),
                batch_size: 1,
                interval,
                registers: vec![RegisterConfig {
                    column: "temp".to_string(),
                    address: 100,
                    length: 0,
                    data_type: DataType::Uint16,
                    expression: None,
                    encoding: StrEncoding::Utf8,
                }],
            }],
        };
        AppConfig {
            devices: vec![device],
            ..AppConfig::default()
        }
    }

    struct Fixture {
        service: AcquisitionService,
        factory: Arc<MockPlcFactory>,
        store: Arc<MemoryStore>,
        queue: Arc<QueueService>,
        _dir: tempfile::TempDir,
    }

    fn fixture(interval: Duration) -> Fixture {
        let dir = tempdir().unwrap();
        let config = test_config(interval);
        let factory = Arc::new(MockPlcFactory::new());
        let lifecycle = Arc::new(ClientLifecycle::new(
            Arc::clone(&factory) as Arc<dyn PlcClientFactory>
        ));
        let store = Arc::new(MemoryStore::new());
        let wal = Arc::new(WalStorage::new(dir.path()).unwrap());
        let queue = Arc::new(QueueService::new(
            Arc::clone(&store) as Arc<dyn PrimaryStore>,
            wal,
            Arc::new(()),
        ));
        let service = AcquisitionService::new(
            &config,
            lifecycle,
            Arc::new(CycleTracker::new()),
            Arc::clone(&queue),
            Arc::new(()),
        );
        Fixture {
            service,
            factory,
            store,
            queue,
            _dir: dir,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_polling_produces_messages() {
        let fixture = fixture(Duration::from_millis(100));
        fixture
            .factory
            .handle("plc-1")
            .set_register(100, &Value::U16(55));

        fixture.service.start_collection_tasks().await;
        assert_eq!(fixture.service.running_count().await, 1);
        // Idempotent start.
        fixture.service.start_collection_tasks().await;
        assert_eq!(fixture.service.running_count().await, 1);

        tokio::time::sleep(Duration::from_millis(350)).await;
        fixture.service.stop_collection_tasks().await;
        assert_eq!(fixture.service.running_count().await, 0);

        assert!(fixture.queue.depth() >= 2, "expected several polls");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreachable_device_keeps_polling() {
        let fixture = fixture(Duration::from_millis(100));
        let handle = fixture.factory.handle("plc-1");
        handle.set_register(100, &Value::U16(55));
        handle.set_reachable(false);

        fixture.service.start_collection_tasks().await;
        tokio::time::sleep(Duration::from_millis(350)).await;

        // Several failed ticks, loop still alive, status degraded.
        assert!(handle.connect_attempts() >= 2);
        assert_eq!(fixture.service.running_count().await, 1);
        let connections = fixture.service.connections().await;
        assert_eq!(connections.len(), 1);
        assert!(!connections[0].connected);
        assert!(connections[0].last_error.is_some());

        // Device comes back; data starts flowing without restart.
        handle.set_reachable(true);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(fixture.queue.depth() >= 1);

        fixture.service.stop_collection_tasks().await;
    }

    #[tokio::test]
    async fn test_write_plc_round_trip() {
        let fixture = fixture(Duration::from_secs(60));
        let outcome = fixture
            .service
            .write_plc("plc-1", 7, "1500", DataType::Uint16)
            .await;
        assert!(outcome.is_success, "{}", outcome.message);
        assert_eq!(
            fixture.factory.handle("plc-1").register_bytes(7),
            Some(1500u16.to_be_bytes().to_vec())
        );
        assert_eq!(fixture.store.total_rows(), 0, "writes bypass the queue");
    }

    #[tokio::test]
    async fn test_write_plc_failures_are_returned() {
        let fixture = fixture(Duration::from_secs(60));

        let outcome = fixture
            .service
            .write_plc("nope", 7, "1", DataType::Uint16)
            .await;
        assert!(!outcome.is_success);
        assert!(outcome.message.contains("unknown device"));

        let outcome = fixture
            .service
            .write_plc("plc-1", 7, "not-a-number", DataType::Uint16)
            .await;
        assert!(!outcome.is_success);

        fixture.factory.handle("plc-1").set_reachable(false);
        let outcome = fixture
            .service
            .write_plc("plc-1", 7, "1", DataType::Uint16)
            .await;
        assert!(!outcome.is_success);
    }
}
