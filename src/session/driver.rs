//! Connection loop
//!
//! One tokio task per connection owns the [`Session`] and its transport.
//! Each iteration waits for a tick, a command or a transport wake-up, drains
//! the command queue, services the streams and forwards events. Application
//! code talks to the loop through a [`ConnectionHandle`].

use std::future;
use std::sync::Arc;
use std::time::Instant as StdInstant;

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::protocol::{ObjectHeaders, Parameter};
use crate::registry::{
    FullTrackName, PublishTrackHandler, PublishTrackStatus, SubscribeTrackHandler, TrackNamespace,
    TrackStatusCell,
};
use crate::stats::ConnectionMetrics;
use crate::transport::Transport;

use super::command::{
    AnnounceResponse, Command, PublishAttributes, SubscribeAttributes, SubscribeResponse,
};
use super::engine::Session;
use super::event::SessionEvent;
use super::publish::PublishTrack;
use super::state::{ConnectionId, ConnectionStatus, Status};

/// Application side of a running connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Wait until the status satisfies `done`; returns the final status
    pub async fn wait_for<F>(&mut self, mut done: F) -> ConnectionStatus
    where
        F: FnMut(ConnectionStatus) -> bool,
    {
        let reached = match self.status.wait_for(|status| done(*status)).await {
            Ok(status) => Some(*status),
            // Loop gone; report the last status it published
            Err(_) => None,
        };
        reached.unwrap_or_else(|| *self.status.borrow())
    }

    /// Queue a command that requires an established connection
    fn submit(&self, command: Command) -> Status {
        if !self.is_connected() {
            return Status::NotConnected;
        }
        match self.commands.send(command) {
            Ok(()) => Status::Ready,
            Err(_) => Status::NotConnected,
        }
    }

    pub fn disconnect(&self) -> Status {
        match self.commands.send(Command::Disconnect) {
            Ok(()) => Status::Disconnecting,
            Err(_) => Status::NotConnected,
        }
    }

    pub fn publish_announce(&self, namespace: TrackNamespace, params: Vec<Parameter>) -> Status {
        if namespace.is_empty() {
            return Status::InvalidParams;
        }
        self.submit(Command::PublishAnnounce { namespace, params })
    }

    pub fn publish_unannounce(&self, namespace: TrackNamespace) -> Status {
        self.submit(Command::PublishUnannounce { namespace })
    }

    pub fn subscribe_track<H>(&self, name: FullTrackName, handler: H, attrs: SubscribeAttributes) -> Status
    where
        H: SubscribeTrackHandler + 'static,
    {
        if name.namespace.is_empty() {
            return Status::InvalidParams;
        }
        self.submit(Command::SubscribeTrack {
            name,
            handler: Box::new(handler),
            attrs,
        })
    }

    pub fn unsubscribe_track(&self, name: FullTrackName) -> Status {
        self.submit(Command::UnsubscribeTrack { name })
    }

    /// Register a published track and get a handle for emitting objects
    pub fn publish_track<H>(
        &self,
        name: FullTrackName,
        handler: H,
        attrs: PublishAttributes,
    ) -> Result<PublishTrack, Status>
    where
        H: PublishTrackHandler + 'static,
    {
        if name.namespace.is_empty() {
            return Err(Status::InvalidParams);
        }
        let cell = TrackStatusCell::new(PublishTrackStatus::NotAnnounced);
        let status = self.submit(Command::PublishTrack {
            name: name.clone(),
            handler: Box::new(handler),
            attrs,
            status: cell.clone(),
        });
        match status {
            Status::Ready => Ok(PublishTrack::new(name, cell, self.commands.clone())),
            other => Err(other),
        }
    }

    pub fn unpublish_track(&self, name: FullTrackName) -> Status {
        self.submit(Command::UnpublishTrack { name })
    }

    /// Queue an object by track alias, bypassing a `PublishTrack` handle
    pub fn publish_object(&self, track_alias: u64, headers: ObjectHeaders, payload: Bytes) -> Status {
        self.submit(Command::PublishObject {
            full_hash: track_alias,
            headers,
            payload,
        })
    }

    pub fn resolve_announce(&self, namespace: TrackNamespace, response: AnnounceResponse) -> Status {
        self.submit(Command::ResolveAnnounce {
            namespace,
            response,
        })
    }

    pub fn resolve_subscribe(&self, subscribe_id: u64, response: SubscribeResponse) -> Status {
        self.submit(Command::ResolveSubscribe {
            subscribe_id,
            response,
        })
    }

    pub fn go_away(&self, new_session_uri: impl Into<String>) -> Status {
        self.submit(Command::GoAway {
            new_session_uri: new_session_uri.into(),
        })
    }
}

/// Loop state for one connection
pub struct Driver<T: Transport> {
    session: Session,
    transport: T,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
    status: watch::Sender<ConnectionStatus>,
}

/// Pair a session with its transport; spawn `Driver::run` to start it
pub fn connection<T: Transport>(
    session: Session,
    transport: T,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> (ConnectionHandle, Driver<T>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
    let handle = ConnectionHandle {
        id: session.id(),
        commands: command_tx,
        status: status_rx,
    };
    let driver = Driver {
        session,
        transport,
        commands: command_rx,
        events,
        status: status_tx,
    };
    (handle, driver)
}

async fn readable(notify: Option<&Arc<Notify>>) {
    match notify {
        Some(notify) => notify.notified().await,
        None => future::pending().await,
    }
}

/// Current time on the tokio clock (pausable in tests)
fn now() -> StdInstant {
    Instant::now().into_std()
}

impl<T: Transport> Driver<T> {
    /// Run until the session is torn down; returns the final metrics
    pub async fn run(mut self) -> ConnectionMetrics {
        let conn_id = self.session.id();
        let notify = self.transport.notifier();
        let mut ticker = time::interval(self.session.config().service_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_open = true;

        let status = self.session.start(&mut self.transport, now());
        tracing::debug!(conn_id = conn_id, status = ?status, "Connection loop started");
        self.flush();

        while !self.session.is_closed() {
            tokio::select! {
                _ = ticker.tick() => {}
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.apply(command),
                    None => {
                        // Every handle is gone
                        commands_open = false;
                        self.apply(Command::Disconnect);
                    }
                },
                _ = readable(notify.as_ref()) => {}
            }

            while let Ok(command) = self.commands.try_recv() {
                self.apply(command);
            }
            self.session.service(&mut self.transport, now());
            self.flush();
        }

        self.flush();
        tracing::debug!(conn_id = conn_id, status = ?self.session.status(), "Connection loop finished");
        self.session.metrics().clone()
    }

    fn apply(&mut self, command: Command) {
        let name = command.name();
        let status = self.session.apply(&mut self.transport, command, now());
        if status != Status::Ready {
            tracing::debug!(
                conn_id = self.session.id(),
                command = name,
                status = ?status,
                "Command not applied"
            );
        }
    }

    /// Forward events and publish the connection status
    fn flush(&mut self) {
        for event in self.session.drain_events() {
            // Nobody listening is fine
            let _ = self.events.send(event);
        }
        let status = self.session.status();
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use crate::transport::MemoryTransport;
    use std::time::Duration;

    fn pair() -> (
        (ConnectionHandle, Driver<MemoryTransport>),
        (ConnectionHandle, Driver<MemoryTransport>),
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let (client_t, server_t) = MemoryTransport::pair();
        let (events, rx) = mpsc::unbounded_channel();
        let config = SessionConfig::default().service_interval(Duration::from_millis(1));
        let client = connection(Session::client(config.clone(), now()), client_t, events.clone());
        let server = connection(Session::server(7, config, now()), server_t, events);
        (client, server, rx)
    }

    #[tokio::test]
    async fn test_loops_reach_connected() {
        let ((mut client, client_loop), (mut server, server_loop), _events) = pair();
        let client_task = tokio::spawn(client_loop.run());
        let server_task = tokio::spawn(server_loop.run());

        let status = client.wait_for(|s| s != ConnectionStatus::Connecting).await;
        assert_eq!(status, ConnectionStatus::Connected);
        let status = server.wait_for(|s| s != ConnectionStatus::Connecting).await;
        assert_eq!(status, ConnectionStatus::Connected);
        assert_eq!(server.id(), 7);

        assert_eq!(client.disconnect(), Status::Disconnecting);
        client_task.await.unwrap();
        let metrics = server_task.await.unwrap();
        assert!(metrics.control_messages_received >= 1);
        assert_eq!(server.status(), ConnectionStatus::ClosedByRemote);
    }

    #[tokio::test]
    async fn test_calls_rejected_before_connected() {
        let ((client, _client_loop), _server, _events) = pair();

        let name = FullTrackName::from_strs(&["live"], "video");
        assert_eq!(client.unsubscribe_track(name.clone()), Status::NotConnected);
        assert_eq!(
            client.publish_announce(TrackNamespace::default(), Vec::new()),
            Status::InvalidParams
        );
    }

    #[test]
    fn test_wait_for_wakes_on_status_change() {
        let ((mut client, client_loop), _server, _events) = pair();

        let mut waiting = tokio_test::task::spawn(client.wait_for(|s| s == ConnectionStatus::Connected));
        tokio_test::assert_pending!(waiting.poll());

        client_loop.status.send_replace(ConnectionStatus::Connected);
        assert!(waiting.is_woken());
        tokio_test::assert_ready_eq!(waiting.poll(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_dropping_handles_disconnects() {
        let ((client, client_loop), (mut server, server_loop), _events) = pair();
        let client_task = tokio::spawn(client_loop.run());
        tokio::spawn(server_loop.run());

        server.wait_for(|s| s == ConnectionStatus::Connected).await;
        drop(client);
        client_task.await.unwrap();

        let status = server.wait_for(|s| s != ConnectionStatus::Connected).await;
        assert_eq!(status, ConnectionStatus::ClosedByRemote);
    }

    #[tokio::test]
    async fn test_wait_for_returns_last_status_when_loop_gone() {
        let ((mut client, client_loop), _server, _events) = pair();
        client_loop.status.send_replace(ConnectionStatus::IdleTimeout);
        drop(client_loop);

        let status = client.wait_for(|s| s == ConnectionStatus::Connected).await;
        assert_eq!(status, ConnectionStatus::IdleTimeout);
    }
}
