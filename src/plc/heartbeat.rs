//! Device heartbeat monitor.
//!
//! Pings every registered device on a fixed interval, independent of the
//! polling loops. A ping only flips the health flag; it is never fatal. The
//! device I/O lock is held for at most the bounded ping duration, so a slow
//! device cannot starve its own polling loop through the heartbeat.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::lifecycle::ClientLifecycle;
use crate::metrics::MetricsSink;

pub struct HeartbeatMonitor {
    lifecycle: Arc<ClientLifecycle>,
    metrics: Arc<dyn MetricsSink>,
    interval: Duration,
    ping_timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(
        lifecycle: Arc<ClientLifecycle>,
        metrics: Arc<dyn MetricsSink>,
        interval: Duration,
        ping_timeout: Duration,
    ) -> Self {
        Self {
            lifecycle,
            metrics,
            interval,
            ping_timeout,
        }
    }

    /// Run the heartbeat loop until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(interval = ?self.interval, "Heartbeat monitor started");
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so freshly registered
        // devices get one poll attempt before their first ping.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.sweep().await,
            }
        }
        tracing::info!("Heartbeat monitor stopped");
    }

    /// Ping every registered device once.
    pub async fn sweep(&self) {
        for (plc_code, slot) in self.lifecycle.snapshot().await {
            let was_healthy = slot.is_healthy();
            let reachable = {
                let mut client = slot.client.lock().await;
                matches!(timeout(self.ping_timeout, client.ping()).await, Ok(true))
            };

            if reachable {
                slot.mark_healthy();
            } else if let Some(uptime) = slot.mark_unhealthy("heartbeat ping failed") {
                self.metrics.connection_duration(&plc_code, uptime);
            }

            if was_healthy != reachable {
                self.metrics.connection_changed(&plc_code, reachable);
                tracing::info!(%plc_code, connected = reachable, "Device connection changed");
            } else {
                tracing::trace!(%plc_code, connected = reachable, "Heartbeat");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::plc::client::PlcClientFactory;
    use crate::plc::mock::{MockPlcFactory, MOCK_PROTOCOL};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TransitionSink {
        changes: AtomicUsize,
        durations: AtomicUsize,
    }

    impl MetricsSink for TransitionSink {
        fn connection_changed(&self, _plc_code: &str, _connected: bool) {
            self.changes.fetch_add(1, Ordering::Relaxed);
        }

        fn connection_duration(&self, _plc_code: &str, _duration: Duration) {
            self.durations.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn test_sweep_tracks_transitions() {
        let factory = Arc::new(MockPlcFactory::new());
        let lifecycle = Arc::new(ClientLifecycle::new(
            Arc::clone(&factory) as Arc<dyn PlcClientFactory>
        ));
        let sink = Arc::new(TransitionSink::default());
        let monitor = HeartbeatMonitor::new(
            Arc::clone(&lifecycle),
            Arc::clone(&sink) as Arc<dyn MetricsSink>,
            Duration::from_secs(60),
            Duration::from_millis(100),
        );

        let config = DeviceConfig::for_tests("plc-1", MOCK_PROTOCOL);
        let slot = lifecycle.get_or_create(&config).await.unwrap();

        // Unhealthy -> healthy transition on first reachable sweep.
        monitor.sweep().await;
        assert!(slot.is_healthy());
        assert_eq!(sink.changes.load(Ordering::Relaxed), 1);

        // Steady state: no transition.
        monitor.sweep().await;
        assert_eq!(sink.changes.load(Ordering::Relaxed), 1);

        // Healthy -> unhealthy records the connection duration.
        factory.handle("plc-1").set_reachable(false);
        monitor.sweep().await;
        assert!(!slot.is_healthy());
        assert_eq!(sink.changes.load(Ordering::Relaxed), 2);
        assert_eq!(sink.durations.load(Ordering::Relaxed), 1);

        let statuses = lifecycle.statuses().await;
        assert_eq!(statuses[0].last_error.as_deref(), Some("heartbeat ping failed"));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let factory = Arc::new(MockPlcFactory::new());
        let lifecycle = Arc::new(ClientLifecycle::new(factory as Arc<dyn PlcClientFactory>));
        let monitor = HeartbeatMonitor::new(
            lifecycle,
            Arc::new(()) as Arc<dyn MetricsSink>,
            Duration::from_millis(10),
            Duration::from_millis(10),
        );

        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            let monitor = Arc::new(monitor);
            tokio::spawn(async move { monitor.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("heartbeat loop did not exit")
            .unwrap();
    }
}
