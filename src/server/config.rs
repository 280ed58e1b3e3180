//! Server configuration

use std::time::Duration;

use crate::session::SessionConfig;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Session settings applied to every accepted connection
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 0, // Unlimited
            session: SessionConfig::default().endpoint_id("moqt-rs-server"),
        }
    }
}

impl ServerConfig {
    /// Create a config with custom session settings
    pub fn with_session(session: SessionConfig) -> Self {
        Self {
            session,
            ..Default::default()
        }
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the endpoint id sent in ServerSetup
    pub fn endpoint_id(mut self, id: impl Into<String>) -> Self {
        self.session = self.session.endpoint_id(id);
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.session = self.session.idle_timeout(timeout);
        self
    }

    /// Set the expiry advertised when accepting subscribes
    pub fn subscribe_expires_ms(mut self, expires_ms: u64) -> Self {
        self.session = self.session.subscribe_expires_ms(expires_ms);
        self
    }

    /// Enable periodic metrics sampling
    pub fn metrics_sample_interval(mut self, interval: Duration) -> Self {
        self.session = self.session.metrics_sample_interval(interval);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.max_connections, 0);
        assert_eq!(config.session.endpoint_id, "moqt-rs-server");
        assert_eq!(config.session.idle_timeout, Duration::from_secs(30));
        assert!(config.session.metrics_sample_interval.is_none());
    }

    #[test]
    fn test_with_session() {
        let session = SessionConfig::default().read_budget(2);
        let config = ServerConfig::with_session(session);

        assert_eq!(config.session.read_budget, 2);
        assert_eq!(config.max_connections, 0);
    }

    #[test]
    fn test_builder_max_connections() {
        let config = ServerConfig::default().max_connections(100);

        assert_eq!(config.max_connections, 100);
    }

    #[test]
    fn test_builder_idle_timeout() {
        let config = ServerConfig::default().idle_timeout(Duration::from_secs(120));

        assert_eq!(config.session.idle_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_builder_subscribe_expires() {
        let config = ServerConfig::default().subscribe_expires_ms(5_000);

        assert_eq!(config.session.subscribe_expires_ms, 5_000);
    }

    #[test]
    fn test_builder_chaining() {
        let config = ServerConfig::default()
            .max_connections(50)
            .endpoint_id("relay-eu")
            .metrics_sample_interval(Duration::from_secs(1));

        assert_eq!(config.max_connections, 50);
        assert_eq!(config.session.endpoint_id, "relay-eu");
        assert_eq!(
            config.session.metrics_sample_interval,
            Some(Duration::from_secs(1))
        );
    }
}
