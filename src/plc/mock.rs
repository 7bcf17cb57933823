//! In-memory protocol driver.
//!
//! Backs the `mock` protocol family: a scriptable register bank used by the
//! test suite and by deployments that want to exercise the pipeline without
//! hardware. Reachability and per-address failures can be toggled at runtime
//! through a [`MockPlcHandle`] while the pipeline owns the client.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::client::{PlcClient, PlcClientFactory};
use super::codec;
use super::error::PlcError;
use super::value::Value;
use crate::config::DeviceConfig;

/// Protocol family selector served by [`MockPlcFactory`].
pub const MOCK_PROTOCOL: &str = "mock";

#[derive(Default)]
struct MockState {
    reachable: AtomicBool,
    registers: Mutex<HashMap<u16, Vec<u8>>>,
    fail_reads: Mutex<HashSet<u16>>,
    connect_attempts: AtomicU64,
}

/// Shared control surface over one mock device.
#[derive(Clone)]
pub struct MockPlcHandle {
    state: Arc<MockState>,
}

impl MockPlcHandle {
    fn new(reachable: bool) -> Self {
        let state = MockState::default();
        state.reachable.store(reachable, Ordering::Relaxed);
        Self {
            state: Arc::new(state),
        }
    }

    /// Toggle device reachability for connect/ping/read/write.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::Relaxed);
    }

    /// Load a typed value into the register bank at `address`.
    pub fn set_register(&self, address: u16, value: &Value) {
        self.set_register_bytes(address, codec::encode(value));
    }

    /// Load raw bytes into the register bank at `address`.
    pub fn set_register_bytes(&self, address: u16, bytes: Vec<u8>) {
        self.state
            .registers
            .lock()
            .expect("register bank poisoned")
            .insert(address, bytes);
    }

    /// Make reads of `address` fail until cleared.
    pub fn fail_reads_at(&self, address: u16) {
        self.state
            .fail_reads
            .lock()
            .expect("failure set poisoned")
            .insert(address);
    }

    /// Clear all scripted read failures.
    pub fn clear_read_failures(&self) {
        self.state
            .fail_reads
            .lock()
            .expect("failure set poisoned")
            .clear();
    }

    /// Current bytes at `address`, if any.
    pub fn register_bytes(&self, address: u16) -> Option<Vec<u8>> {
        self.state
            .registers
            .lock()
            .expect("register bank poisoned")
            .get(&address)
            .cloned()
    }

    /// Number of connect attempts observed so far.
    pub fn connect_attempts(&self) -> u64 {
        self.state.connect_attempts.load(Ordering::Relaxed)
    }
}

/// One mock protocol session.
pub struct MockPlc {
    state: Arc<MockState>,
    connected: bool,
}

impl MockPlc {
    fn new(handle: &MockPlcHandle) -> Self {
        Self {
            state: Arc::clone(&handle.state),
            connected: false,
        }
    }

    fn reachable(&self) -> bool {
        self.state.reachable.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PlcClient for MockPlc {
    async fn connect(&mut self) -> Result<(), PlcError> {
        if self.connected {
            return Ok(());
        }
        self.state.connect_attempts.fetch_add(1, Ordering::Relaxed);
        if !self.reachable() {
            return Err(PlcError::Connect("device unreachable".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PlcError> {
        self.connected = false;
        Ok(())
    }

    async fn ping(&mut self) -> bool {
        self.reachable()
    }

    async fn read_bytes(&mut self, address: u16, length: u16) -> Result<Vec<u8>, PlcError> {
        if !self.connected || !self.reachable() {
            self.connected = false;
            return Err(PlcError::Timeout);
        }
        if self
            .state
            .fail_reads
            .lock()
            .expect("failure set poisoned")
            .contains(&address)
        {
            return Err(PlcError::Rejected(format!("read failure at {address}")));
        }
        let registers = self.state.registers.lock().expect("register bank poisoned");
        let bytes = registers
            .get(&address)
            .ok_or_else(|| PlcError::Rejected(format!("no register at {address}")))?;
        Ok(bytes.iter().copied().take(length as usize).collect())
    }

    async fn write_value(&mut self, address: u16, value: Value) -> Result<(), PlcError> {
        if !self.connected || !self.reachable() {
            self.connected = false;
            return Err(PlcError::Timeout);
        }
        self.state
            .registers
            .lock()
            .expect("register bank poisoned")
            .insert(address, codec::encode(&value));
        Ok(())
    }
}

/// Factory for the `mock` protocol family.
///
/// Handles are created lazily, so tests can script a device's register bank
/// before the lifecycle manager constructs its client.
pub struct MockPlcFactory {
    handles: Mutex<HashMap<String, MockPlcHandle>>,
    default_reachable: bool,
}

impl MockPlcFactory {
    pub fn new() -> Self {
        Self::with_reachability(true)
    }

    /// Factory whose devices start in the given reachability state.
    pub fn with_reachability(reachable: bool) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            default_reachable: reachable,
        }
    }

    /// Control surface for the device, created on first use.
    pub fn handle(&self, plc_code: &str) -> MockPlcHandle {
        self.handles
            .lock()
            .expect("handle map poisoned")
            .entry(plc_code.to_string())
            .or_insert_with(|| MockPlcHandle::new(self.default_reachable))
            .clone()
    }
}

impl Default for MockPlcFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PlcClientFactory for MockPlcFactory {
    fn create(&self, config: &DeviceConfig) -> Result<Box<dyn PlcClient>, PlcError> {
        if config.protocol != MOCK_PROTOCOL {
            return Err(PlcError::UnsupportedProtocol(config.protocol.clone()));
        }
        let handle = self.handle(&config.plc_code);
        Ok(Box::new(MockPlc::new(&handle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::codec::StrEncoding;
    use crate::plc::value::DataType;

    fn device(code: &str) -> DeviceConfig {
        DeviceConfig::for_tests(code, MOCK_PROTOCOL)
    }

    #[tokio::test]
    async fn test_connect_and_typed_read() {
        let factory = MockPlcFactory::new();
        let handle = factory.handle("plc-a");
        handle.set_register(100, &Value::U16(512));

        let mut client = factory.create(&device("plc-a")).unwrap();
        client.connect().await.unwrap();
        let value = client
            .read_value(100, 2, DataType::Uint16, StrEncoding::Utf8)
            .await
            .unwrap();
        assert_eq!(value, Value::U16(512));
    }

    #[tokio::test]
    async fn test_unreachable_connect_fails() {
        let factory = MockPlcFactory::with_reachability(false);
        let mut client = factory.create(&device("plc-b")).unwrap();
        assert!(matches!(
            client.connect().await,
            Err(PlcError::Connect(_))
        ));
        assert!(!client.ping().await);

        factory.handle("plc-b").set_reachable(true);
        client.connect().await.unwrap();
        assert!(client.ping().await);
    }

    #[tokio::test]
    async fn test_scripted_read_failure() {
        let factory = MockPlcFactory::new();
        let handle = factory.handle("plc-c");
        handle.set_register(1, &Value::U16(1));
        handle.fail_reads_at(1);

        let mut client = factory.create(&device("plc-c")).unwrap();
        client.connect().await.unwrap();
        assert!(client.read_bytes(1, 2).await.is_err());

        handle.clear_read_failures();
        assert!(client.read_bytes(1, 2).await.is_ok());
    }

    #[tokio::test]
    async fn test_write_lands_in_register_bank() {
        let factory = MockPlcFactory::new();
        let mut client = factory.create(&device("plc-d")).unwrap();
        client.connect().await.unwrap();
        client.write_value(7, Value::I32(-9)).await.unwrap();
        assert_eq!(
            factory.handle("plc-d").register_bytes(7),
            Some((-9i32).to_be_bytes().to_vec())
        );
    }

    #[test]
    fn test_unknown_protocol_rejected() {
        let factory = MockPlcFactory::new();
        let err = factory
            .create(&DeviceConfig::for_tests("plc-e", "s7comm"))
            .err()
            .unwrap();
        assert!(matches!(err, PlcError::UnsupportedProtocol(_)));
    }
}
