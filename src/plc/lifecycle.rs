//! Per-device client lifecycle.
//!
//! One [`DeviceSlot`] per device code holds the protocol client behind the
//! device's I/O mutex plus its health flag. The map itself is concurrent
//! across devices; all I/O against a single device serializes on the slot's
//! mutex, so the polling loop, the heartbeat ping, and the ad-hoc write path
//! can never race on one connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use super::client::{PlcClient, PlcClientFactory};
use super::error::PlcError;
use crate::config::DeviceConfig;

/// Read-only projection of one device's connection state.
#[derive(Debug, Clone, Serialize)]
pub struct PlcConnectionStatus {
    pub plc_code: String,
    pub connected: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// One device's client, I/O lock, and health state.
pub struct DeviceSlot {
    /// The protocol session. The mutex is the device I/O lock.
    pub client: Mutex<Box<dyn PlcClient>>,
    healthy: AtomicBool,
    last_seen: StdRwLock<Option<DateTime<Utc>>>,
    last_error: StdRwLock<Option<String>>,
    connected_since: StdRwLock<Option<Instant>>,
}

impl DeviceSlot {
    fn new(client: Box<dyn PlcClient>) -> Self {
        Self {
            client: Mutex::new(client),
            healthy: AtomicBool::new(false),
            last_seen: StdRwLock::new(None),
            last_error: StdRwLock::new(None),
            connected_since: StdRwLock::new(None),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Record a successful I/O or ping.
    pub fn mark_healthy(&self) {
        self.healthy.store(true, Ordering::Relaxed);
        *self.last_seen.write().expect("last_seen poisoned") = Some(Utc::now());
        *self.last_error.write().expect("last_error poisoned") = None;
        let mut since = self
            .connected_since
            .write()
            .expect("connected_since poisoned");
        if since.is_none() {
            *since = Some(Instant::now());
        }
    }

    /// Record a failed I/O or ping.
    ///
    /// Returns how long the device had been healthy, when this call is the
    /// transition edge.
    pub fn mark_unhealthy(&self, error: impl Into<String>) -> Option<Duration> {
        self.healthy.store(false, Ordering::Relaxed);
        *self.last_error.write().expect("last_error poisoned") = Some(error.into());
        self.connected_since
            .write()
            .expect("connected_since poisoned")
            .take()
            .map(|since| since.elapsed())
    }

    fn status(&self, plc_code: &str) -> PlcConnectionStatus {
        PlcConnectionStatus {
            plc_code: plc_code.to_string(),
            connected: self.is_healthy(),
            last_seen: *self.last_seen.read().expect("last_seen poisoned"),
            last_error: self.last_error.read().expect("last_error poisoned").clone(),
        }
    }
}

impl std::fmt::Debug for DeviceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSlot")
            .field("healthy", &self.is_healthy())
            .finish_non_exhaustive()
    }
}

/// Keyed store of device slots.
///
/// Injected wherever device I/O happens; there are no ambient singletons.
/// Construction is idempotent per device code, and teardown waits for
/// in-flight I/O by acquiring the device lock before disconnecting.
pub struct ClientLifecycle {
    factory: Arc<dyn PlcClientFactory>,
    slots: RwLock<HashMap<String, Arc<DeviceSlot>>>,
}

impl ClientLifecycle {
    pub fn new(factory: Arc<dyn PlcClientFactory>) -> Self {
        Self {
            factory,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Return the existing slot for this device, or construct one.
    ///
    /// The client is built but not connected; the first I/O connects it.
    /// Factory errors surface to the caller and nothing is registered, so
    /// the next poll tick retries construction.
    pub async fn get_or_create(&self, config: &DeviceConfig) -> Result<Arc<DeviceSlot>, PlcError> {
        if let Some(slot) = self.slots.read().await.get(&config.plc_code) {
            return Ok(Arc::clone(slot));
        }

        let mut slots = self.slots.write().await;
        // Re-check under the write lock; another task may have won the race.
        if let Some(slot) = slots.get(&config.plc_code) {
            return Ok(Arc::clone(slot));
        }

        let client = self.factory.create(config)?;
        let slot = Arc::new(DeviceSlot::new(client));
        slots.insert(config.plc_code.clone(), Arc::clone(&slot));
        tracing::debug!(plc_code = %config.plc_code, "Client registered");
        Ok(slot)
    }

    /// Look up a slot without constructing one.
    pub async fn get(&self, plc_code: &str) -> Option<Arc<DeviceSlot>> {
        self.slots.read().await.get(plc_code).map(Arc::clone)
    }

    /// Disconnect and remove one device.
    ///
    /// The slot leaves the map first so no new users acquire it, then the
    /// device lock is taken, which waits for any in-flight I/O to finish
    /// before the connection is closed.
    pub async fn close(&self, plc_code: &str) {
        let slot = self.slots.write().await.remove(plc_code);
        if let Some(slot) = slot {
            let mut client = slot.client.lock().await;
            if let Err(e) = client.close().await {
                tracing::warn!(plc_code, error = %e, "Close failed");
            }
            tracing::debug!(plc_code, "Client closed");
        }
    }

    /// Disconnect and remove every device. Used on shutdown.
    pub async fn close_all(&self) {
        let codes: Vec<String> = self.slots.read().await.keys().cloned().collect();
        for code in codes {
            self.close(&code).await;
        }
    }

    /// Snapshot of all registered slots.
    pub async fn snapshot(&self) -> Vec<(String, Arc<DeviceSlot>)> {
        self.slots
            .read()
            .await
            .iter()
            .map(|(code, slot)| (code.clone(), Arc::clone(slot)))
            .collect()
    }

    /// Device-code-sorted connection status projection.
    pub async fn statuses(&self) -> Vec<PlcConnectionStatus> {
        let mut statuses: Vec<PlcConnectionStatus> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(code, slot)| slot.status(code))
            .collect();
        statuses.sort_by(|a, b| a.plc_code.cmp(&b.plc_code));
        statuses
    }

    /// Number of registered devices.
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}

impl std::fmt::Debug for ClientLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientLifecycle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::mock::{MockPlcFactory, MOCK_PROTOCOL};

    fn lifecycle() -> (Arc<MockPlcFactory>, ClientLifecycle) {
        let factory = Arc::new(MockPlcFactory::new());
        let lifecycle = ClientLifecycle::new(Arc::clone(&factory) as Arc<dyn PlcClientFactory>);
        (factory, lifecycle)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let (_, lifecycle) = lifecycle();
        let config = DeviceConfig::for_tests("plc-1", MOCK_PROTOCOL);

        let a = lifecycle.get_or_create(&config).await.unwrap();
        let b = lifecycle.get_or_create(&config).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b), "one slot per device code");
        assert_eq!(lifecycle.len().await, 1);
    }

    #[tokio::test]
    async fn test_health_defaults_false_until_marked() {
        let (_, lifecycle) = lifecycle();
        let config = DeviceConfig::for_tests("plc-1", MOCK_PROTOCOL);
        let slot = lifecycle.get_or_create(&config).await.unwrap();

        assert!(!slot.is_healthy());
        slot.mark_healthy();
        assert!(slot.is_healthy());

        let uptime = slot.mark_unhealthy("ping failed");
        assert!(uptime.is_some());
        assert!(!slot.is_healthy());
        // Not a transition edge the second time.
        assert!(slot.mark_unhealthy("ping failed").is_none());
    }

    #[tokio::test]
    async fn test_close_removes_slot() {
        let (_, lifecycle) = lifecycle();
        let config = DeviceConfig::for_tests("plc-1", MOCK_PROTOCOL);
        lifecycle.get_or_create(&config).await.unwrap();

        lifecycle.close("plc-1").await;
        assert!(lifecycle.get("plc-1").await.is_none());
        // Closing an unknown device is a no-op.
        lifecycle.close("plc-1").await;
    }

    #[tokio::test]
    async fn test_statuses_sorted_by_device_code() {
        let (_, lifecycle) = lifecycle();
        for code in ["plc-b", "plc-a", "plc-c"] {
            let config = DeviceConfig::for_tests(code, MOCK_PROTOCOL);
            lifecycle.get_or_create(&config).await.unwrap();
        }

        let statuses = lifecycle.statuses().await;
        let codes: Vec<&str> = statuses.iter().map(|s| s.plc_code.as_str()).collect();
        assert_eq!(codes, vec!["plc-a", "plc-b", "plc-c"]);
        assert!(statuses.iter().all(|s| !s.connected));
    }

    #[tokio::test]
    async fn test_factory_error_registers_nothing() {
        let (_, lifecycle) = lifecycle();
        let config = DeviceConfig::for_tests("plc-x", "s7comm");
        assert!(lifecycle.get_or_create(&config).await.is_err());
        assert!(lifecycle.is_empty().await);
    }
}
