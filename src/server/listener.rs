//! MoQT server
//!
//! Accepts transports and spawns one connection loop per client.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::registry::{FullTrackName, PublishTrackHandler, SubscribeTrackHandler, TrackNamespace};
use crate::server::config::ServerConfig;
use crate::server::connections::ConnectionRegistry;
use crate::session::{
    connection, AnnounceResponse, ConnectionHandle, ConnectionId, PublishAttributes, PublishTrack,
    Session, SessionEvent, Status, SubscribeAttributes, SubscribeResponse,
};
use crate::transport::Transport;

/// Events from server connections; every variant carries its `conn_id`
pub type ServerEvent = SessionEvent;

/// MoQT server
pub struct MoqServer {
    config: ServerConfig,
    connections: Arc<ConnectionRegistry>,
    next_connection_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
    running: AtomicBool,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
}

impl MoqServer {
    /// Create a new server with the given configuration.
    ///
    /// Returns the server and a receiver for events from all connections.
    pub fn new(config: ServerConfig) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let server = Self {
            config,
            connections: Arc::new(ConnectionRegistry::new()),
            next_connection_id: AtomicU64::new(1),
            connection_semaphore,
            running: AtomicBool::new(false),
            event_tx,
        };
        (server, event_rx)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Begin accepting connections
    pub fn start(&self) -> Status {
        if self.running.swap(true, Ordering::AcqRel) {
            return Status::Ready;
        }
        tracing::info!(
            endpoint_id = %self.config.session.endpoint_id,
            max_connections = self.config.max_connections,
            "MoQT server started"
        );
        Status::Ready
    }

    /// Stop accepting and disconnect every live connection
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let handles = self.connections.drain();
        tracing::info!(connections = handles.len(), "MoQT server stopping");
        for handle in handles {
            handle.disconnect();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Take ownership of a transport and start its setup exchange.
    ///
    /// Must be called from within a tokio runtime.
    pub fn accept<T: Transport + 'static>(&self, transport: T) -> Result<ConnectionId> {
        if !self.is_running() {
            return Err(Error::ServerNotStarted);
        }

        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(
                        max_connections = self.config.max_connections,
                        "Connection rejected: limit reached"
                    );
                    return Err(Error::ConnectionLimitReached);
                }
            }
        } else {
            None
        };

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Transport(format!("no tokio runtime: {}", e)))?;

        let conn_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(conn_id = conn_id, "New connection");
        let _ = self.event_tx.send(ServerEvent::NewConnection { conn_id });

        let session = Session::server(conn_id, self.config.session.clone(), Instant::now().into_std());
        let (handle, driver) = connection(session, transport, self.event_tx.clone());
        self.connections.insert(handle);

        let connections = Arc::clone(&self.connections);
        runtime.spawn(async move {
            let _permit = permit;
            let metrics = driver.run().await;
            connections.remove(conn_id);
            tracing::debug!(
                conn_id = conn_id,
                control_messages_received = metrics.control_messages_received,
                objects_received = metrics.objects_received,
                "Connection closed"
            );
        });

        Ok(conn_id)
    }

    /// Handle for a live connection
    pub fn connection(&self, conn_id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.get(conn_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.ids()
    }

    fn with_connection<F>(&self, conn_id: ConnectionId, f: F) -> Status
    where
        F: FnOnce(&ConnectionHandle) -> Status,
    {
        match self.connections.get(conn_id) {
            Some(handle) => f(&handle),
            None => Status::NotConnected,
        }
    }

    /// Answer an `AnnounceReceived` event
    pub fn resolve_announce(
        &self,
        conn_id: ConnectionId,
        namespace: TrackNamespace,
        response: AnnounceResponse,
    ) -> Status {
        self.with_connection(conn_id, |h| h.resolve_announce(namespace, response))
    }

    /// Answer a `SubscribeReceived` event
    pub fn resolve_subscribe(
        &self,
        conn_id: ConnectionId,
        subscribe_id: u64,
        response: SubscribeResponse,
    ) -> Status {
        self.with_connection(conn_id, |h| h.resolve_subscribe(subscribe_id, response))
    }

    /// Publish a track on one connection
    pub fn publish_track<H>(
        &self,
        conn_id: ConnectionId,
        name: FullTrackName,
        handler: H,
        attrs: PublishAttributes,
    ) -> std::result::Result<PublishTrack, Status>
    where
        H: PublishTrackHandler + 'static,
    {
        match self.connections.get(conn_id) {
            Some(handle) => handle.publish_track(name, handler, attrs),
            None => Err(Status::NotConnected),
        }
    }

    pub fn unpublish_track(&self, conn_id: ConnectionId, name: FullTrackName) -> Status {
        self.with_connection(conn_id, |h| h.unpublish_track(name))
    }

    /// Subscribe to a track the client announced
    pub fn subscribe_track<H>(
        &self,
        conn_id: ConnectionId,
        name: FullTrackName,
        handler: H,
        attrs: SubscribeAttributes,
    ) -> Status
    where
        H: SubscribeTrackHandler + 'static,
    {
        self.with_connection(conn_id, |h| h.subscribe_track(name, handler, attrs))
    }

    pub fn unsubscribe_track(&self, conn_id: ConnectionId, name: FullTrackName) -> Status {
        self.with_connection(conn_id, |h| h.unsubscribe_track(name))
    }

    /// Ask a client to reconnect elsewhere
    pub fn go_away(&self, conn_id: ConnectionId, new_session_uri: impl Into<String>) -> Status {
        self.with_connection(conn_id, |h| h.go_away(new_session_uri))
    }

    pub fn disconnect(&self, conn_id: ConnectionId) -> Status {
        match self.connections.remove(conn_id) {
            Some(handle) => handle.disconnect(),
            None => Status::NotConnected,
        }
    }
}

impl Drop for MoqServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionStatus;
    use crate::transport::MemoryTransport;

    #[test]
    fn test_accept_requires_start() {
        let (server, _events) = MoqServer::new(ServerConfig::default());
        let (transport, _peer) = MemoryTransport::pair();

        assert!(matches!(server.accept(transport), Err(Error::ServerNotStarted)));
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let (server, mut events) = MoqServer::new(ServerConfig::default().max_connections(1));
        assert_eq!(server.start(), Status::Ready);

        let (first, _first_peer) = MemoryTransport::pair();
        let (second, _second_peer) = MemoryTransport::pair();

        let conn_id = server.accept(first).unwrap();
        assert_eq!(conn_id, 1);
        assert!(matches!(server.accept(second), Err(Error::ConnectionLimitReached)));
        assert_eq!(server.connection_count(), 1);

        match events.recv().await {
            Some(ServerEvent::NewConnection { conn_id }) => assert_eq!(conn_id, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_calls_on_unknown_connection() {
        let (server, _events) = MoqServer::new(ServerConfig::default());
        server.start();
        let name = FullTrackName::from_strs(&["live"], "video");

        assert_eq!(server.disconnect(42), Status::NotConnected);
        assert_eq!(server.unpublish_track(42, name.clone()), Status::NotConnected);
        assert_eq!(
            server.resolve_subscribe(42, 0, SubscribeResponse::ok()),
            Status::NotConnected
        );
        assert!(server.connection(42).is_none());
    }

    #[tokio::test]
    async fn test_stop_disconnects_everything() {
        let (server, _events) = MoqServer::new(ServerConfig::default());
        server.start();

        let (transport, _peer) = MemoryTransport::pair();
        let conn_id = server.accept(transport).unwrap();
        let mut handle = server.connection(conn_id).unwrap();

        server.stop();
        assert!(!server.is_running());
        assert_eq!(server.connection_count(), 0);

        let status = handle.wait_for(|s| s != ConnectionStatus::Connecting).await;
        assert_eq!(status, ConnectionStatus::NotConnected);
    }
}
