//! MoQT client endpoint
//!
//! High-level API for one outgoing connection: announce namespaces, publish
//! tracks and subscribe to the server's tracks.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::protocol::Parameter;
use crate::registry::{FullTrackName, PublishTrackHandler, SubscribeTrackHandler, TrackNamespace};
use crate::session::{
    connection, ConnectionHandle, ConnectionStatus, PublishAttributes, PublishTrack, Session,
    SessionEvent, Status, SubscribeAttributes,
};
use crate::stats::ConnectionMetrics;
use crate::transport::Transport;

use super::config::ClientConfig;

/// Events from the client connection
pub type ClientEvent = SessionEvent;

/// MoQT client
///
/// # Example
/// ```no_run
/// use moqt_rs::client::{ClientConfig, MoqClient};
/// use moqt_rs::transport::MemoryTransport;
///
/// # async fn example() {
/// let (transport, _server_side) = MemoryTransport::pair();
/// let (mut client, mut events) = MoqClient::new(ClientConfig::default());
///
/// tokio::spawn(async move {
///     while let Some(event) = events.recv().await {
///         println!("Event: {:?}", event);
///     }
/// });
///
/// client.connect(transport);
/// let status = client.wait_connected().await;
/// println!("Connection: {:?}", status);
/// # }
/// ```
pub struct MoqClient {
    config: ClientConfig,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
    handle: Option<ConnectionHandle>,
    task: Option<JoinHandle<ConnectionMetrics>>,
}

impl MoqClient {
    /// Create a new client.
    ///
    /// Returns the client and a receiver for connection events.
    pub fn new(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let client = Self {
            config,
            event_tx,
            handle: None,
            task: None,
        };
        (client, event_rx)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start the setup exchange over `transport`.
    ///
    /// Must be called from within a tokio runtime. Returns `Connecting` once
    /// the connection loop is spawned; watch `status()` or the
    /// `StatusChanged` event for the outcome.
    pub fn connect<T: Transport + 'static>(&mut self, transport: T) -> Status {
        match self.status() {
            ConnectionStatus::Connecting => return Status::Connecting,
            ConnectionStatus::Connected => return Status::Ready,
            _ => {}
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot connect outside a tokio runtime");
                return Status::FailedToConnect;
            }
        };

        let session = Session::client(self.config.session.clone(), Instant::now().into_std());
        let (handle, driver) = connection(session, transport, self.event_tx.clone());
        tracing::info!(
            endpoint_id = %self.config.session.endpoint_id,
            "Connecting to server"
        );
        self.task = Some(runtime.spawn(driver.run()));
        self.handle = Some(handle);
        Status::Connecting
    }

    /// Wait for the setup exchange to finish.
    ///
    /// Gives up after `connect_timeout` and disconnects; returns the status
    /// reached.
    pub async fn wait_connected(&mut self) -> ConnectionStatus {
        let timeout = self.config.connect_timeout;
        let Some(handle) = self.handle.as_mut() else {
            return ConnectionStatus::NotConnected;
        };
        let reached = time::timeout(timeout, handle.wait_for(|s| s != ConnectionStatus::Connecting)).await;
        match reached {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(timeout = ?timeout, "Setup did not complete in time");
                handle.disconnect();
                ConnectionStatus::NotConnected
            }
        }
    }

    pub fn disconnect(&self) -> Status {
        match &self.handle {
            Some(handle) => handle.disconnect(),
            None => Status::NotConnected,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        match &self.handle {
            Some(handle) => handle.status(),
            None => ConnectionStatus::NotConnected,
        }
    }

    fn handle(&self) -> Option<&ConnectionHandle> {
        self.handle.as_ref()
    }

    pub fn publish_announce(&self, namespace: TrackNamespace, params: Vec<Parameter>) -> Status {
        self.handle()
            .map_or(Status::NotConnected, |h| h.publish_announce(namespace, params))
    }

    pub fn publish_unannounce(&self, namespace: TrackNamespace) -> Status {
        self.handle()
            .map_or(Status::NotConnected, |h| h.publish_unannounce(namespace))
    }

    /// Subscribe with the configured default priority and the latest-group filter
    pub fn subscribe_track<H>(&self, name: FullTrackName, handler: H) -> Status
    where
        H: SubscribeTrackHandler + 'static,
    {
        self.subscribe_track_with(name, handler, SubscribeAttributes::default())
    }

    pub fn subscribe_track_with<H>(
        &self,
        name: FullTrackName,
        handler: H,
        attrs: SubscribeAttributes,
    ) -> Status
    where
        H: SubscribeTrackHandler + 'static,
    {
        self.handle()
            .map_or(Status::NotConnected, |h| h.subscribe_track(name, handler, attrs))
    }

    pub fn unsubscribe_track(&self, name: FullTrackName) -> Status {
        self.handle()
            .map_or(Status::NotConnected, |h| h.unsubscribe_track(name))
    }

    /// Publish a track, announcing its namespace if needed
    pub fn publish_track<H>(&self, name: FullTrackName, handler: H) -> Result<PublishTrack, Status>
    where
        H: PublishTrackHandler + 'static,
    {
        self.publish_track_with(name, handler, PublishAttributes::default())
    }

    pub fn publish_track_with<H>(
        &self,
        name: FullTrackName,
        handler: H,
        attrs: PublishAttributes,
    ) -> Result<PublishTrack, Status>
    where
        H: PublishTrackHandler + 'static,
    {
        match self.handle() {
            Some(handle) => handle.publish_track(name, handler, attrs),
            None => Err(Status::NotConnected),
        }
    }

    pub fn unpublish_track(&self, name: FullTrackName) -> Status {
        self.handle()
            .map_or(Status::NotConnected, |h| h.unpublish_track(name))
    }

    /// Wait for the connection loop to exit; returns its final metrics
    pub async fn closed(&mut self) -> Option<ConnectionMetrics> {
        let task = self.task.take()?;
        match task.await {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                tracing::warn!(error = %e, "Connection loop task failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    #[test]
    fn test_calls_before_connect() {
        let (client, _events) = MoqClient::new(ClientConfig::default());
        let name = FullTrackName::from_strs(&["live"], "video");

        assert_eq!(client.status(), ConnectionStatus::NotConnected);
        assert_eq!(client.disconnect(), Status::NotConnected);
        assert_eq!(client.unsubscribe_track(name.clone()), Status::NotConnected);
        assert_eq!(
            client.publish_announce(TrackNamespace::from_strs(&["live"]), Vec::new()),
            Status::NotConnected
        );
        assert!(matches!(
            client.publish_track(name, NoopPublisher),
            Err(Status::NotConnected)
        ));
    }

    #[test]
    fn test_connect_without_runtime_fails() {
        let (mut client, _events) = MoqClient::new(ClientConfig::default());
        let (transport, _peer) = MemoryTransport::pair();

        assert_eq!(client.connect(transport), Status::FailedToConnect);
        assert_eq!(client.status(), ConnectionStatus::NotConnected);
    }

    #[tokio::test]
    async fn test_connect_twice_reports_progress() {
        let (mut client, _events) = MoqClient::new(ClientConfig::default());
        let (transport, _peer) = MemoryTransport::pair();
        let (second, _other) = MemoryTransport::pair();

        assert_eq!(client.connect(transport), Status::Connecting);
        // No server answers, so the first attempt is still in setup
        assert_eq!(client.connect(second), Status::Connecting);
        assert_eq!(client.disconnect(), Status::Disconnecting);
    }

    struct NoopPublisher;

    impl PublishTrackHandler for NoopPublisher {}
}
