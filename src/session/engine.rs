//! Session engine
//!
//! [`Session`] is the sans-IO core of one connection: it owns the scheduler,
//! the track registry and every state machine, and is driven by calling
//! [`Session::service`] with a transport and the current time. Nothing in
//! here blocks or spawns; [`super::driver`] runs it on a tokio task.
//!
//! Lifecycle and timers live here, application operations in `ops.rs`,
//! inbound message handling in `dispatch.rs`.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;

use crate::error::Error;
use crate::protocol::constants::*;
use crate::protocol::{ControlMessage, ObjectHeaders, Parameter, SetupParams, SetupRole};
use crate::registry::{
    FullTrackName, PublishTrackHandler, PublishTrackStatus, SubscribeStatus, SubscribeTrackHandler,
    TrackEntry, TrackNamespace, TrackRegistry, TrackStatusCell,
};
use crate::stats::{ConnectionMetrics, SampleTimer};
use crate::transport::{StreamId, Transport, TransportState};

use super::announce::{AnnounceEntry, PeerAnnounceState, PublishAnnounceStatus};
use super::command::{
    AnnounceResponse, Command, PublishAttributes, SubscribeAttributes, SubscribeResponse,
};
use super::config::SessionConfig;
use super::dispatch::InboundStream;
use super::event::SessionEvent;
use super::publish::{PeerSubscription, PublishObjectStatus};
use super::scheduler::{IterationReport, StreamScheduler};
use super::state::{ConnectionId, ConnectionState, ConnectionStatus, Role, Status};
use super::subscribe::{SubscribeEntry, SubscribeState};

/// State owned by one connection, handed to the scheduler as its sink
pub(crate) struct SessionCore {
    pub(super) conn: ConnectionState,
    pub(super) config: SessionConfig,
    pub(super) registry: TrackRegistry,
    /// Namespaces we announced
    pub(super) announces: HashMap<TrackNamespace, AnnounceEntry>,
    /// Namespaces the peer announced
    pub(super) peer_announces: HashMap<TrackNamespace, PeerAnnounceState>,
    /// Our outgoing subscriptions by subscribe id
    pub(super) subscribes: HashMap<u64, SubscribeEntry>,
    /// Peer subscriptions on our tracks by the peer's subscribe id
    pub(super) peer_subscribes: HashMap<u64, PeerSubscription>,
    pub(super) inbound: HashMap<StreamId, InboundStream>,
    pub(super) next_subscribe_id: u64,
    pub(super) metrics: ConnectionMetrics,
    pub(super) events: Vec<SessionEvent>,
    pub(super) now: Instant,
    pub(super) closed: bool,
    sampler: SampleTimer,
}

impl SessionCore {
    fn new(id: ConnectionId, role: Role, config: SessionConfig, now: Instant) -> Self {
        Self {
            conn: ConnectionState::new(id, role, config.idle_timeout, now),
            sampler: SampleTimer::new(config.metrics_sample_interval, now),
            config,
            registry: TrackRegistry::new(),
            announces: HashMap::new(),
            peer_announces: HashMap::new(),
            subscribes: HashMap::new(),
            peer_subscribes: HashMap::new(),
            inbound: HashMap::new(),
            next_subscribe_id: 0,
            metrics: ConnectionMetrics::new(),
            events: Vec::new(),
            now,
            closed: false,
        }
    }

    pub(super) fn emit(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    /// Encode and queue one control message
    pub(super) fn send_control<T: Transport>(
        &mut self,
        transport: &mut T,
        message: ControlMessage,
    ) -> crate::error::Result<()> {
        let bytes = message.encode()?;
        let len = bytes.len();
        let control = transport.control_stream();
        transport.send(control, bytes)?;
        self.metrics.bytes_sent += len as u64;
        self.metrics.control_messages_sent += 1;
        tracing::debug!(
            conn_id = self.conn.id,
            message = message.name(),
            bytes = len,
            "Control message sent"
        );
        Ok(())
    }

    /// Send, logging instead of failing; used where the caller cannot recover
    pub(super) fn send_control_or_warn<T: Transport>(
        &mut self,
        transport: &mut T,
        message: ControlMessage,
    ) {
        let name = message.name();
        if let Err(e) = self.send_control(transport, message) {
            tracing::warn!(conn_id = self.conn.id, message = name, error = %e, "Control send failed");
        }
    }

    fn start<T: Transport>(&mut self, transport: &mut T) -> Status {
        if self.closed {
            return Status::FailedToConnect;
        }
        match self.conn.status() {
            ConnectionStatus::Connected => return Status::Ready,
            ConnectionStatus::Connecting => return Status::Connecting,
            _ => {}
        }
        if !self.conn.start_connecting(self.now) {
            return Status::FailedToConnect;
        }

        let conn_id = self.conn.id;
        tracing::info!(conn_id = conn_id, role = ?self.conn.role, "Connecting");
        self.emit(SessionEvent::StatusChanged {
            conn_id,
            status: ConnectionStatus::Connecting,
        });

        if self.conn.role == Role::Client {
            let setup = ControlMessage::ClientSetup {
                versions: vec![MOQT_VERSION],
                params: SetupParams {
                    role: Some(SetupRole::PubSub),
                    path: self.config.path.clone(),
                    endpoint_id: Some(self.config.endpoint_id.clone()),
                },
            };
            if let Err(e) = self.send_control(transport, setup) {
                tracing::warn!(conn_id = conn_id, error = %e, "Failed to send client setup");
                self.teardown(transport, ConnectionStatus::NotConnected, CLOSE_INTERNAL_ERROR, "setup failed");
                return Status::FailedToConnect;
            }
        }

        Status::Connecting
    }

    /// Setup exchange finished
    pub(super) fn on_connected(&mut self, version: u64) {
        if !self.conn.complete_setup(version, self.now) {
            return;
        }
        let conn_id = self.conn.id;
        tracing::info!(
            conn_id = conn_id,
            version = version,
            peer = ?self.conn.peer_endpoint_id,
            "Connected"
        );
        self.emit(SessionEvent::StatusChanged {
            conn_id,
            status: ConnectionStatus::Connected,
        });
    }

    /// Connection-fatal error
    pub(super) fn fail<T: Transport>(&mut self, transport: &mut T, error: &Error) {
        let conn_id = self.conn.id;
        tracing::warn!(conn_id = conn_id, error = %error, "Closing connection on error");
        let code = match error {
            Error::Protocol(_) => {
                self.emit(SessionEvent::ProtocolViolation {
                    conn_id,
                    error: error.to_string(),
                });
                CLOSE_PROTOCOL_VIOLATION
            }
            _ => CLOSE_INTERNAL_ERROR,
        };
        self.teardown(transport, ConnectionStatus::NotConnected, code, "connection error");
    }

    /// Drop every entry and close the transport
    ///
    /// Handlers see `NotConnected` and announces report `NotConnected` before
    /// being removed. Runs at most once.
    pub(super) fn teardown<T: Transport>(
        &mut self,
        transport: &mut T,
        status: ConnectionStatus,
        code: u64,
        reason: &str,
    ) {
        if self.closed {
            return;
        }
        self.closed = true;
        let conn_id = self.conn.id;
        let previous = self.conn.close(status);

        let announces: Vec<_> = self.announces.drain().collect();
        for (namespace, mut entry) in announces {
            entry.connection_lost();
            self.emit(SessionEvent::AnnounceStatusChanged {
                conn_id,
                namespace,
                status: PublishAnnounceStatus::NotConnected,
            });
        }

        let tracks = self.registry.drain();
        let track_count = tracks.len();
        for entry in tracks {
            match entry {
                TrackEntry::Publish(mut track) => track.set_status(PublishTrackStatus::NotConnected),
                TrackEntry::Subscribe(mut track) => track.set_status(SubscribeStatus::NotConnected),
            }
        }

        self.subscribes.clear();
        self.peer_subscribes.clear();
        self.peer_announces.clear();
        self.inbound.clear();

        if transport.state() == TransportState::Open {
            transport.close(code, reason);
        }

        self.metrics.duration = self.conn.uptime(self.now);
        tracing::info!(
            conn_id = conn_id,
            from = ?previous,
            status = ?self.conn.status(),
            reason = reason,
            tracks = track_count,
            "Connection closed"
        );
        self.emit(SessionEvent::StatusChanged {
            conn_id,
            status: self.conn.status(),
        });
    }

    /// Idle timeout, response deadlines, expiries and metrics sampling
    fn check_timers<T: Transport>(&mut self, transport: &mut T) {
        let now = self.now;
        let conn_id = self.conn.id;

        if self.conn.idle_expired(now) {
            tracing::info!(conn_id = conn_id, timeout = ?self.config.idle_timeout, "Idle timeout");
            self.teardown(transport, ConnectionStatus::IdleTimeout, CLOSE_IDLE_TIMEOUT, "idle timeout");
            return;
        }
        if !self.conn.is_connected() {
            return;
        }

        let overdue: Vec<TrackNamespace> = self
            .announces
            .values()
            .filter(|entry| entry.response_overdue(now))
            .map(|entry| entry.namespace.clone())
            .collect();
        for namespace in overdue {
            tracing::warn!(conn_id = conn_id, namespace = %namespace, "Announce response timed out");
            self.announce_rejected(&namespace);
        }

        let mut timed_out = Vec::new();
        let mut expired = Vec::new();
        for entry in self.subscribes.values() {
            if entry.machine.response_overdue(now) {
                timed_out.push(entry.subscribe_id);
            } else if entry.machine.expired(now) {
                expired.push(entry.subscribe_id);
            }
        }
        for subscribe_id in timed_out {
            tracing::warn!(conn_id = conn_id, subscribe_id = subscribe_id, "Subscribe response timed out");
            self.finish_subscribe(
                transport,
                subscribe_id,
                SubscribeStatus::Rejected {
                    code: SUBSCRIBE_ERROR_TIMEOUT,
                },
                true,
            );
        }
        for subscribe_id in expired {
            tracing::info!(conn_id = conn_id, subscribe_id = subscribe_id, "Subscription expired");
            self.finish_subscribe(transport, subscribe_id, SubscribeStatus::Ended, true);
        }

        let expired_peers: Vec<u64> = self
            .peer_subscribes
            .values()
            .filter(|peer| peer.machine.expired(now))
            .map(|peer| peer.subscribe_id)
            .collect();
        for subscribe_id in expired_peers {
            tracing::info!(conn_id = conn_id, subscribe_id = subscribe_id, "Peer subscription expired");
            self.end_peer_subscription(
                transport,
                subscribe_id,
                SUBSCRIBE_DONE_EXPIRED,
                "subscription expired",
            );
        }

        if self.sampler.poll(now) {
            self.sample_metrics();
        }
    }

    fn sample_metrics(&mut self) {
        self.metrics.duration = self.conn.uptime(self.now);
        self.emit(SessionEvent::MetricsSampled {
            conn_id: self.conn.id,
            metrics: self.metrics.clone(),
        });
        for track in self.registry.publish_tracks_mut() {
            track.sample_metrics();
        }
        for track in self.registry.subscribe_tracks_mut() {
            track.sample_metrics();
        }
    }
}

/// One MoQT connection, independent of how it is driven
pub struct Session {
    core: SessionCore,
    scheduler: StreamScheduler,
}

impl Session {
    pub fn new(id: ConnectionId, role: Role, config: SessionConfig, now: Instant) -> Self {
        // Control stream id is taken from the transport in `start`
        let scheduler = StreamScheduler::new(config.scheduler(), 0);
        Self {
            core: SessionCore::new(id, role, config, now),
            scheduler,
        }
    }

    /// Client-side session (connection id 0)
    pub fn client(config: SessionConfig, now: Instant) -> Self {
        Self::new(0, Role::Client, config, now)
    }

    pub fn server(id: ConnectionId, config: SessionConfig, now: Instant) -> Self {
        Self::new(id, Role::Server, config, now)
    }

    pub fn id(&self) -> ConnectionId {
        self.core.conn.id
    }

    pub fn role(&self) -> Role {
        self.core.conn.role
    }

    pub fn status(&self) -> ConnectionStatus {
        self.core.conn.status()
    }

    /// Torn down; no further work will be done
    pub fn is_closed(&self) -> bool {
        self.core.closed
    }

    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    pub fn metrics(&self) -> &ConnectionMetrics {
        &self.core.metrics
    }

    pub fn peer_endpoint_id(&self) -> Option<&str> {
        self.core.conn.peer_endpoint_id.as_deref()
    }

    pub fn announce_status(&self, namespace: &TrackNamespace) -> Option<PublishAnnounceStatus> {
        self.core.announces.get(namespace).map(|entry| entry.status())
    }

    pub fn publish_status(&self, name: &FullTrackName) -> Option<PublishTrackStatus> {
        let hash = self.core.registry.lookup_name(name)?;
        match self.core.registry.lookup(hash.full_hash)? {
            TrackEntry::Publish(track) => Some(track.status()),
            TrackEntry::Subscribe(_) => None,
        }
    }

    pub fn subscribe_status(&self, name: &FullTrackName) -> Option<SubscribeStatus> {
        let hash = self.core.registry.lookup_name(name)?;
        match self.core.registry.lookup(hash.full_hash)? {
            TrackEntry::Subscribe(track) => Some(track.status()),
            TrackEntry::Publish(_) => None,
        }
    }

    /// State of our subscription to `name`
    pub fn subscribe_state(&self, name: &FullTrackName) -> Option<SubscribeState> {
        let full_hash = name.track_hash().full_hash;
        self.core
            .subscribes
            .values()
            .find(|entry| entry.hash.full_hash == full_hash)
            .map(|entry| entry.machine.state())
    }

    /// Live peer subscriptions on our tracks
    pub fn peer_subscription_count(&self) -> usize {
        self.core.peer_subscribes.len()
    }

    pub fn track_count(&self) -> usize {
        self.core.registry.len()
    }

    /// Data streams currently being read
    pub fn data_stream_count(&self) -> usize {
        self.scheduler.stream_count()
    }

    /// Take the events emitted since the last call
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.core.events)
    }

    /// Begin the setup exchange
    pub fn start<T: Transport>(&mut self, transport: &mut T, now: Instant) -> Status {
        self.core.now = now;
        if self.core.conn.status() == ConnectionStatus::NotConnected && !self.core.closed {
            self.scheduler = StreamScheduler::new(self.core.config.scheduler(), transport.control_stream());
        }
        let status = self.core.start(transport);
        self.settle();
        status
    }

    /// One loop iteration: read, dispatch, check timers
    pub fn service<T: Transport>(&mut self, transport: &mut T, now: Instant) -> IterationReport {
        self.core.now = now;
        if self.core.closed || self.core.conn.status() == ConnectionStatus::NotConnected {
            return IterationReport::default();
        }

        match transport.state() {
            TransportState::Open => {}
            TransportState::ClosedByPeer { code, reason } => {
                tracing::info!(conn_id = self.core.conn.id, code = code, reason = %reason, "Closed by peer");
                self.core
                    .teardown(transport, ConnectionStatus::ClosedByRemote, code, &reason);
                self.settle();
                return IterationReport::default();
            }
            TransportState::ClosedLocally => {
                self.core.teardown(
                    transport,
                    ConnectionStatus::NotConnected,
                    CLOSE_NO_ERROR,
                    "transport closed",
                );
                self.settle();
                return IterationReport::default();
            }
        }

        let report = match self.scheduler.service(transport, &mut self.core) {
            Ok(report) => report,
            Err(e) => {
                self.core.fail(transport, &e);
                self.settle();
                return IterationReport::default();
            }
        };

        self.core.metrics.scheduler_iterations += 1;
        self.core.metrics.budget_exhaustions += report.budget_exhausted as u64;
        if report.frames > 0 {
            tracing::trace!(
                conn_id = self.core.conn.id,
                frames = report.frames,
                streams = report.streams_serviced,
                bytes = report.bytes_read,
                "Iteration"
            );
        }

        if !self.core.closed {
            self.core.check_timers(transport);
        }
        self.settle();
        report
    }

    /// Apply a queued command
    pub fn apply<T: Transport>(&mut self, transport: &mut T, command: Command, now: Instant) -> Status {
        self.core.now = now;
        tracing::trace!(conn_id = self.core.conn.id, command = command.name(), "Applying command");
        let core = &mut self.core;
        let status = match command {
            Command::Disconnect => core.disconnect(transport),
            Command::PublishAnnounce { namespace, params } => {
                core.publish_announce(transport, namespace, params)
            }
            Command::PublishUnannounce { namespace } => core.publish_unannounce(transport, &namespace),
            Command::SubscribeTrack {
                name,
                handler,
                attrs,
            } => core.subscribe_track(transport, name, handler, attrs),
            Command::UnsubscribeTrack { name } => core.unsubscribe_track(transport, &name),
            Command::PublishTrack {
                name,
                handler,
                attrs,
                status,
            } => core.publish_track(transport, name, handler, attrs, status),
            Command::UnpublishTrack { name } => core.unpublish_track(transport, &name),
            Command::PublishObject {
                full_hash,
                headers,
                payload,
            } => match core.publish_object(transport, full_hash, headers, &payload) {
                PublishObjectStatus::Ok => Status::Ready,
                PublishObjectStatus::NotConnected => Status::NotConnected,
                PublishObjectStatus::InternalError => Status::InternalError,
                _ => Status::NotReady,
            },
            Command::ResolveAnnounce {
                namespace,
                response,
            } => core.resolve_announce(transport, &namespace, response),
            Command::ResolveSubscribe {
                subscribe_id,
                response,
            } => core.resolve_subscribe(transport, subscribe_id, response),
            Command::GoAway { new_session_uri } => core.go_away(transport, new_session_uri),
        };
        self.settle();
        status
    }

    pub fn disconnect<T: Transport>(&mut self, transport: &mut T) -> Status {
        let status = self.core.disconnect(transport);
        self.settle();
        status
    }

    pub fn publish_announce<T: Transport>(
        &mut self,
        transport: &mut T,
        namespace: TrackNamespace,
        params: Vec<Parameter>,
    ) -> Status {
        self.core.publish_announce(transport, namespace, params)
    }

    pub fn publish_unannounce<T: Transport>(
        &mut self,
        transport: &mut T,
        namespace: &TrackNamespace,
    ) -> Status {
        self.core.publish_unannounce(transport, namespace)
    }

    pub fn subscribe_track<T: Transport>(
        &mut self,
        transport: &mut T,
        name: FullTrackName,
        handler: Box<dyn SubscribeTrackHandler>,
        attrs: SubscribeAttributes,
    ) -> Status {
        self.core.subscribe_track(transport, name, handler, attrs)
    }

    pub fn unsubscribe_track<T: Transport>(
        &mut self,
        transport: &mut T,
        name: &FullTrackName,
    ) -> Status {
        self.core.unsubscribe_track(transport, name)
    }

    /// Register a published track; the returned cell mirrors its status
    pub fn publish_track<T: Transport>(
        &mut self,
        transport: &mut T,
        name: FullTrackName,
        handler: Box<dyn PublishTrackHandler>,
        attrs: PublishAttributes,
    ) -> Result<TrackStatusCell, Status> {
        let cell = TrackStatusCell::new(PublishTrackStatus::NotAnnounced);
        match self
            .core
            .publish_track(transport, name, handler, attrs, cell.clone())
        {
            Status::Ready => Ok(cell),
            other => Err(other),
        }
    }

    pub fn unpublish_track<T: Transport>(
        &mut self,
        transport: &mut T,
        name: &FullTrackName,
    ) -> Status {
        self.core.unpublish_track(transport, name)
    }

    pub fn publish_object<T: Transport>(
        &mut self,
        transport: &mut T,
        full_hash: u64,
        headers: ObjectHeaders,
        payload: Bytes,
    ) -> PublishObjectStatus {
        self.core.publish_object(transport, full_hash, headers, &payload)
    }

    pub fn resolve_announce<T: Transport>(
        &mut self,
        transport: &mut T,
        namespace: &TrackNamespace,
        response: AnnounceResponse,
    ) -> Status {
        self.core.resolve_announce(transport, namespace, response)
    }

    pub fn resolve_subscribe<T: Transport>(
        &mut self,
        transport: &mut T,
        subscribe_id: u64,
        response: SubscribeResponse,
    ) -> Status {
        self.core.resolve_subscribe(transport, subscribe_id, response)
    }

    pub fn go_away<T: Transport>(&mut self, transport: &mut T, new_session_uri: String) -> Status {
        self.core.go_away(transport, new_session_uri)
    }

    fn settle(&mut self) {
        if self.core.closed {
            self.scheduler.reset();
        }
    }
}
