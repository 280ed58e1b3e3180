//! Per-connection session configuration

use std::time::Duration;

use crate::protocol::constants::*;

use super::scheduler::SchedulerConfig;

/// Session configuration options
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Endpoint id sent in the setup parameters
    pub endpoint_id: String,

    /// Path parameter sent in ClientSetup
    pub path: Option<String>,

    /// Disconnect if no control or data activity within this time
    pub idle_timeout: Duration,

    /// Frames dispatched per stream per iteration
    pub read_budget: usize,

    /// Bytes pulled per stream per iteration
    pub max_read_bytes: usize,

    /// Largest accepted control message payload
    pub max_control_message_size: usize,

    /// Largest accepted data message payload
    pub max_message_size: usize,

    /// How long an outgoing Subscribe waits for its response
    pub subscribe_ttl: Duration,

    /// Expiry advertised in SubscribeOk (0 = never)
    pub subscribe_expires_ms: u64,

    /// How long an Announce waits for its response
    pub announce_response_timeout: Duration,

    /// Metrics sampling interval (None = disabled)
    pub metrics_sample_interval: Option<Duration>,

    /// Loop wake-up interval for timers when no data arrives
    pub service_interval: Duration,

    /// Priority used when a call does not specify one
    pub default_priority: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint_id: "moqt-rs".to_string(),
            path: None,
            idle_timeout: Duration::from_secs(30),
            read_budget: READ_LOOP_MAX_PER_STREAM,
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            max_control_message_size: MAX_CONTROL_MESSAGE_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            subscribe_ttl: DEFAULT_SUBSCRIBE_TTL,
            subscribe_expires_ms: DEFAULT_SUBSCRIBE_EXPIRES_MS,
            announce_response_timeout: DEFAULT_ANNOUNCE_TIMEOUT,
            metrics_sample_interval: None,
            service_interval: Duration::from_millis(10),
            default_priority: DEFAULT_PRIORITY,
        }
    }
}

impl SessionConfig {
    /// Set the endpoint id
    pub fn endpoint_id(mut self, id: impl Into<String>) -> Self {
        self.endpoint_id = id.into();
        self
    }

    /// Set the path parameter
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the per-stream frame budget (at least 1)
    pub fn read_budget(mut self, budget: usize) -> Self {
        self.read_budget = budget.max(1);
        self
    }

    /// Set the per-stream byte budget (at least 1)
    pub fn max_read_bytes(mut self, bytes: usize) -> Self {
        self.max_read_bytes = bytes.max(1);
        self
    }

    /// Set the largest accepted data message
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the pending subscribe time-to-live
    pub fn subscribe_ttl(mut self, ttl: Duration) -> Self {
        self.subscribe_ttl = ttl;
        self
    }

    /// Set the expiry advertised when accepting subscribes
    pub fn subscribe_expires_ms(mut self, expires_ms: u64) -> Self {
        self.subscribe_expires_ms = expires_ms;
        self
    }

    /// Set the announce response timeout
    pub fn announce_response_timeout(mut self, timeout: Duration) -> Self {
        self.announce_response_timeout = timeout;
        self
    }

    /// Enable periodic metrics sampling
    pub fn metrics_sample_interval(mut self, interval: Duration) -> Self {
        self.metrics_sample_interval = Some(interval);
        self
    }

    /// Set the loop wake-up interval
    pub fn service_interval(mut self, interval: Duration) -> Self {
        self.service_interval = interval;
        self
    }

    /// Set the default priority
    pub fn default_priority(mut self, priority: u8) -> Self {
        self.default_priority = priority;
        self
    }

    /// Scheduler limits derived from this config
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            read_budget: self.read_budget,
            max_read_bytes: self.max_read_bytes,
            max_control_message_size: self.max_control_message_size,
            max_data_message_size: self.max_message_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();

        assert_eq!(config.read_budget, READ_LOOP_MAX_PER_STREAM);
        assert_eq!(config.subscribe_ttl, DEFAULT_SUBSCRIBE_TTL);
        assert_eq!(config.subscribe_expires_ms, 0);
        assert!(config.metrics_sample_interval.is_none());
        assert!(config.path.is_none());
    }

    #[test]
    fn test_builder_read_budget_floor() {
        let config = SessionConfig::default().read_budget(0).max_read_bytes(0);

        assert_eq!(config.read_budget, 1);
        assert_eq!(config.max_read_bytes, 1);
    }

    #[test]
    fn test_builder_scheduler_config() {
        let config = SessionConfig::default()
            .read_budget(4)
            .max_read_bytes(512)
            .max_message_size(1024);
        let scheduler = config.scheduler();

        assert_eq!(scheduler.read_budget, 4);
        assert_eq!(scheduler.max_read_bytes, 512);
        assert_eq!(scheduler.max_data_message_size, 1024);
        assert_eq!(scheduler.max_control_message_size, MAX_CONTROL_MESSAGE_SIZE);
    }

    #[test]
    fn test_builder_identity() {
        let config = SessionConfig::default().endpoint_id("relay-1").path("/moq");

        assert_eq!(config.endpoint_id, "relay-1");
        assert_eq!(config.path.as_deref(), Some("/moq"));
    }
}
