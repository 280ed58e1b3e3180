//! Client configuration

use std::time::Duration;

use crate::session::SessionConfig;

/// Client configuration options
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Session settings for the connection
    pub session: SessionConfig,

    /// How long `wait_connected` waits for the setup exchange
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Create a config with custom session settings
    pub fn with_session(session: SessionConfig) -> Self {
        Self {
            session,
            ..Default::default()
        }
    }

    /// Set the endpoint id sent in ClientSetup
    pub fn endpoint_id(mut self, id: impl Into<String>) -> Self {
        self.session = self.session.endpoint_id(id);
        self
    }

    /// Set the path parameter sent in ClientSetup
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.session = self.session.path(path);
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.session = self.session.idle_timeout(timeout);
        self
    }

    /// Set the setup exchange timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
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
        let config = ClientConfig::default();

        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.session.endpoint_id, "moqt-rs");
        assert!(config.session.path.is_none());
    }

    #[test]
    fn test_builder_endpoint_and_path() {
        let config = ClientConfig::default().endpoint_id("camera-1").path("/live");

        assert_eq!(config.session.endpoint_id, "camera-1");
        assert_eq!(config.session.path.as_deref(), Some("/live"));
    }

    #[test]
    fn test_builder_timeouts() {
        let config = ClientConfig::default()
            .idle_timeout(Duration::from_secs(5))
            .connect_timeout(Duration::from_secs(2));

        assert_eq!(config.session.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_builder_metrics_sample_interval() {
        let config = ClientConfig::default().metrics_sample_interval(Duration::from_secs(1));

        assert_eq!(
            config.session.metrics_sample_interval,
            Some(Duration::from_secs(1))
        );
    }
}
