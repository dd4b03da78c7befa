//! Connection health supervision
//!
//! [`ConnectionHealth`] is the shared liveness flag between the bridge
//! connection and the monitor. The monitor polls it on a fixed interval
//! and, after enough consecutive unhealthy checks, forces a reconnect
//! out-of-band. It never touches decoded data.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::CaptureConfig;

/// Shared liveness state of the relay connection
#[derive(Debug, Default)]
pub struct ConnectionHealth {
    alive: AtomicBool,
    reconnect: Notify,
}

impl ConnectionHealth {
    /// Create in the not-alive state
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the connection recently produced a frame
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Update the liveness flag
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Relaxed);
    }

    /// Request an out-of-band reconnect
    ///
    /// The request is latched, so it is not lost if the connection is not
    /// currently waiting.
    pub fn force_reconnect(&self) {
        self.reconnect.notify_one();
    }

    /// Wait until a reconnect is requested
    pub async fn reconnect_requested(&self) {
        self.reconnect.notified().await;
    }
}

/// Fixed-interval poller of [`ConnectionHealth`]
pub struct HealthMonitor {
    health: Arc<ConnectionHealth>,
    interval: std::time::Duration,
    threshold: u32,
}

impl HealthMonitor {
    /// Create a monitor over the given health state
    pub fn new(health: Arc<ConnectionHealth>, config: &CaptureConfig) -> Self {
        Self {
            health,
            interval: config.health_interval,
            threshold: config.health_failure_threshold.max(1),
        }
    }

    /// Spawn the monitor task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // the first tick fires immediately

        let mut failures = 0u32;
        loop {
            ticker.tick().await;
            if self.health.is_alive() {
                failures = 0;
                continue;
            }
            failures += 1;
            if failures >= self.threshold {
                tracing::error!(
                    consecutive_failures = failures,
                    "Relay connection unhealthy, forcing reconnect"
                );
                self.health.force_reconnect();
                failures = 0;
            } else {
                tracing::warn!(
                    consecutive_failures = failures,
                    threshold = self.threshold,
                    "Relay connection liveness check failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast_config() -> CaptureConfig {
        CaptureConfig::default().health_check(Duration::from_millis(10), 3)
    }

    #[tokio::test]
    async fn test_monitor_trips_after_threshold() {
        let health = Arc::new(ConnectionHealth::new());
        let monitor = HealthMonitor::new(Arc::clone(&health), &fast_config());
        let task = monitor.spawn();

        // Never marked alive; three checks should trip the monitor.
        tokio::time::timeout(Duration::from_secs(1), health.reconnect_requested())
            .await
            .expect("monitor should force a reconnect");

        task.abort();
    }

    #[tokio::test]
    async fn test_monitor_quiet_while_alive() {
        let health = Arc::new(ConnectionHealth::new());
        health.set_alive(true);
        let monitor = HealthMonitor::new(Arc::clone(&health), &fast_config());
        let task = monitor.spawn();

        let tripped =
            tokio::time::timeout(Duration::from_millis(200), health.reconnect_requested())
                .await
                .is_ok();
        assert!(!tripped);

        task.abort();
    }

    #[tokio::test]
    async fn test_forced_reconnect_is_latched() {
        let health = ConnectionHealth::new();
        health.force_reconnect();

        // The waiter arrives after the request and still sees it.
        tokio::time::timeout(Duration::from_millis(100), health.reconnect_requested())
            .await
            .expect("latched reconnect request");
    }
}
