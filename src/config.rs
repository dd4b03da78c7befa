//! Capture engine configuration

use std::time::Duration;

/// Configuration for the capture engine
///
/// Covers the relay connection, health supervision, per-broadcast workers
/// and startup reconciliation. All timing knobs are explicit so deployments
/// can tune them instead of relying on hidden constants.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Relay endpoint, `host:port`
    pub relay_addr: String,

    /// Authentication token sent in the hello frame
    pub auth_token: String,

    /// Connect attempt must complete within this time
    pub connect_timeout: Duration,

    /// Maximum time to wait for a frame before treating the socket as dead
    pub read_timeout: Duration,

    /// Initial reconnect backoff delay
    pub reconnect_backoff: Duration,

    /// Upper bound for the reconnect backoff delay
    pub reconnect_backoff_max: Duration,

    /// Interval between health monitor liveness checks
    pub health_interval: Duration,

    /// Consecutive failed checks before the monitor forces a reconnect
    pub health_failure_threshold: u32,

    /// Cursor acknowledgement interval override
    ///
    /// `None` uses the heartbeat interval supplied by the relay (falling
    /// back to [`DEFAULT_ACK_INTERVAL`] when the relay sends none). The
    /// relay's exact keepalive contract is not pinned down, so this stays
    /// tunable.
    pub ack_interval: Option<Duration>,

    /// Interval between aggregate counter flushes to the store
    pub flush_interval: Duration,

    /// Capacity of each capture worker's event channel
    pub worker_channel_capacity: usize,

    /// Consecutive persistence failures before a worker transitions to failed
    pub max_write_failures: u32,

    /// Grace delay before startup reconciliation runs
    ///
    /// Used as a timeout fallback when no readiness signal arrives from the
    /// supervision layer. Running reconciliation too early risks repairing
    /// broadcasts whose workers have simply not been respawned yet.
    pub reconcile_grace: Duration,

    /// Maximum accepted frame size in bytes
    pub max_frame_size: usize,
}

/// Ack cadence used when the relay never supplies a heartbeat interval
pub const DEFAULT_ACK_INTERVAL: Duration = Duration::from_secs(10);

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            relay_addr: "127.0.0.1:9400".to_string(),
            auth_token: String::new(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            reconnect_backoff: Duration::from_secs(1),
            reconnect_backoff_max: Duration::from_secs(60),
            health_interval: Duration::from_secs(10),
            health_failure_threshold: 3,
            ack_interval: None,
            flush_interval: Duration::from_secs(5),
            worker_channel_capacity: 256,
            max_write_failures: 5,
            reconcile_grace: Duration::from_secs(30),
            max_frame_size: 1024 * 1024, // 1MB
        }
    }
}

impl CaptureConfig {
    /// Create a config pointing at the given relay endpoint
    pub fn with_relay(addr: impl Into<String>) -> Self {
        Self {
            relay_addr: addr.into(),
            ..Default::default()
        }
    }

    /// Set the authentication token
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = token.into();
        self
    }

    /// Set the read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the reconnect backoff range
    pub fn reconnect_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_backoff = base;
        self.reconnect_backoff_max = max;
        self
    }

    /// Set the health check interval and failure threshold
    pub fn health_check(mut self, interval: Duration, threshold: u32) -> Self {
        self.health_interval = interval;
        self.health_failure_threshold = threshold;
        self
    }

    /// Override the relay-driven ack cadence
    pub fn ack_interval(mut self, interval: Duration) -> Self {
        self.ack_interval = Some(interval);
        self
    }

    /// Set the aggregate flush interval
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the persistence failure budget for capture workers
    pub fn max_write_failures(mut self, max: u32) -> Self {
        self.max_write_failures = max;
        self
    }

    /// Set the reconciliation grace delay
    pub fn reconcile_grace(mut self, grace: Duration) -> Self {
        self.reconcile_grace = grace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();

        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert_eq!(config.reconnect_backoff, Duration::from_secs(1));
        assert_eq!(config.reconnect_backoff_max, Duration::from_secs(60));
        assert_eq!(config.health_failure_threshold, 3);
        assert!(config.ack_interval.is_none());
        assert_eq!(config.max_write_failures, 5);
        assert_eq!(config.worker_channel_capacity, 256);
    }

    #[test]
    fn test_with_relay() {
        let config = CaptureConfig::with_relay("relay.example:9400");

        assert_eq!(config.relay_addr, "relay.example:9400");
        assert_eq!(config.read_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_chaining() {
        let config = CaptureConfig::with_relay("10.0.0.1:9400")
            .auth_token("secret")
            .read_timeout(Duration::from_secs(5))
            .reconnect_backoff(Duration::from_millis(100), Duration::from_secs(10))
            .health_check(Duration::from_secs(2), 5)
            .ack_interval(Duration::from_secs(3))
            .flush_interval(Duration::from_secs(1))
            .max_write_failures(2)
            .reconcile_grace(Duration::from_secs(15));

        assert_eq!(config.auth_token, "secret");
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect_backoff, Duration::from_millis(100));
        assert_eq!(config.reconnect_backoff_max, Duration::from_secs(10));
        assert_eq!(config.health_interval, Duration::from_secs(2));
        assert_eq!(config.health_failure_threshold, 5);
        assert_eq!(config.ack_interval, Some(Duration::from_secs(3)));
        assert_eq!(config.flush_interval, Duration::from_secs(1));
        assert_eq!(config.max_write_failures, 2);
        assert_eq!(config.reconcile_grace, Duration::from_secs(15));
    }
}
