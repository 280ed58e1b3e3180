//! Application operations on a session
//!
//! Each call returns a [`Status`] saying whether it was accepted. Rejected
//! calls (`NotConnected`, `InvalidParams`, `NotReady`) leave every entry
//! untouched; outcomes arrive later through handlers and events.

use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::constants::*;
use crate::protocol::{ControlMessage, ObjectHeaders, Parameter, Subscribe};
use crate::registry::{
    FullTrackName, PublishTrackEntry, PublishTrackHandler, PublishTrackStatus, SubscribeStatus,
    SubscribeTrackEntry, SubscribeTrackHandler, TrackEntry, TrackNamespace, TrackStatusCell,
};
use crate::transport::Transport;

use super::announce::{AnnounceEntry, PeerAnnounceState, PublishAnnounceStatus};
use super::command::{AnnounceResponse, PublishAttributes, SubscribeAttributes, SubscribeResponse};
use super::engine::SessionCore;
use super::event::SessionEvent;
use super::publish::PublishObjectStatus;
use super::state::{ConnectionStatus, Role, Status};
use super::subscribe::{SubscribeEntry, SubscribeState};

impl SessionCore {
    pub(super) fn disconnect<T: Transport>(&mut self, transport: &mut T) -> Status {
        if self.closed || self.conn.status() == ConnectionStatus::NotConnected {
            return Status::NotConnected;
        }
        tracing::info!(conn_id = self.conn.id, "Disconnecting");
        self.teardown(transport, ConnectionStatus::NotConnected, CLOSE_NO_ERROR, "disconnect");
        Status::Ready
    }

    pub(super) fn go_away<T: Transport>(&mut self, transport: &mut T, new_session_uri: String) -> Status {
        if !self.conn.is_connected() {
            return Status::NotConnected;
        }
        match self.send_control(transport, ControlMessage::GoAway { new_session_uri }) {
            Ok(()) => Status::Ready,
            Err(_) => Status::InternalError,
        }
    }

    // ---- Announce (this endpoint publishes a namespace) ----

    pub(super) fn publish_announce<T: Transport>(
        &mut self,
        transport: &mut T,
        namespace: TrackNamespace,
        params: Vec<Parameter>,
    ) -> Status {
        if !self.conn.is_connected() {
            return Status::NotConnected;
        }
        if namespace.is_empty() {
            return Status::InvalidParams;
        }
        match self.announces.get(&namespace).map(|entry| entry.status()) {
            Some(PublishAnnounceStatus::PendingAnnounceResponse) | Some(PublishAnnounceStatus::Ok) => {
                return Status::Ready;
            }
            Some(PublishAnnounceStatus::SendingUnannounce) => return Status::NotReady,
            _ => {}
        }

        let mut entry = AnnounceEntry::new(namespace.clone());
        let deadline = self.now + self.config.announce_response_timeout;
        if entry.connection_ready().is_err() || entry.request(deadline).is_err() {
            return Status::InternalError;
        }
        let message = ControlMessage::Announce {
            namespace: namespace.clone(),
            params,
        };
        if let Err(e) = self.send_control(transport, message) {
            tracing::warn!(conn_id = self.conn.id, namespace = %namespace, error = %e, "Announce send failed");
            return Status::InternalError;
        }

        tracing::info!(conn_id = self.conn.id, namespace = %namespace, "Announcing namespace");
        self.announces.insert(namespace.clone(), entry);
        self.announce_changed(&namespace);
        Status::Ready
    }

    pub(super) fn publish_unannounce<T: Transport>(
        &mut self,
        transport: &mut T,
        namespace: &TrackNamespace,
    ) -> Status {
        if !self.conn.is_connected() {
            return Status::NotConnected;
        }
        let Some(entry) = self.announces.get_mut(namespace) else {
            return Status::InvalidParams;
        };
        if let Err(status) = entry.begin_unannounce() {
            tracing::debug!(conn_id = self.conn.id, namespace = %namespace, status = ?status, "Cannot unannounce");
            return Status::NotReady;
        }
        self.announce_changed(namespace);

        let sent = self.send_control(
            transport,
            ControlMessage::Unannounce {
                namespace: namespace.clone(),
            },
        );
        if let Some(mut entry) = self.announces.remove(namespace) {
            if let Err(status) = entry.unannounce_sent() {
                tracing::debug!(conn_id = self.conn.id, namespace = %namespace, status = ?status, "Unannounce in wrong state");
            }
        }
        self.emit(SessionEvent::AnnounceStatusChanged {
            conn_id: self.conn.id,
            namespace: namespace.clone(),
            status: PublishAnnounceStatus::NotAnnounced,
        });
        self.refresh_namespace(namespace.namespace_hash());

        match sent {
            Ok(()) => {
                tracing::info!(conn_id = self.conn.id, namespace = %namespace, "Namespace unannounced");
                Status::Ready
            }
            Err(_) => Status::InternalError,
        }
    }

    /// Emit the entry's current status and rebind its tracks
    pub(super) fn announce_changed(&mut self, namespace: &TrackNamespace) {
        let Some(status) = self.announces.get(namespace).map(|entry| entry.status()) else {
            return;
        };
        self.emit(SessionEvent::AnnounceStatusChanged {
            conn_id: self.conn.id,
            namespace: namespace.clone(),
            status,
        });
        self.refresh_namespace(namespace.namespace_hash());
    }

    /// AnnounceError or response timeout
    pub(super) fn announce_rejected(&mut self, namespace: &TrackNamespace) {
        let Some(entry) = self.announces.get_mut(namespace) else {
            return;
        };
        if entry.reject().is_ok() {
            self.announce_changed(namespace);
        }
    }

    /// Answer a peer Announce (server role)
    pub(super) fn resolve_announce<T: Transport>(
        &mut self,
        transport: &mut T,
        namespace: &TrackNamespace,
        response: AnnounceResponse,
    ) -> Status {
        if !self.conn.is_connected() {
            return Status::NotConnected;
        }
        if self.peer_announces.get(namespace) != Some(&PeerAnnounceState::Pending) {
            return Status::InvalidParams;
        }

        let (message, accepted) = match response {
            AnnounceResponse::Ok => (
                ControlMessage::AnnounceOk {
                    namespace: namespace.clone(),
                },
                true,
            ),
            AnnounceResponse::Error { code, reason } => (
                ControlMessage::AnnounceError {
                    namespace: namespace.clone(),
                    code,
                    reason,
                },
                false,
            ),
        };
        if self.send_control(transport, message).is_err() {
            return Status::InternalError;
        }
        if accepted {
            self.peer_announces
                .insert(namespace.clone(), PeerAnnounceState::Accepted);
        } else {
            self.peer_announces.remove(namespace);
        }
        tracing::info!(conn_id = self.conn.id, namespace = %namespace, accepted = accepted, "Announce resolved");
        Status::Ready
    }

    // ---- Subscribe (this endpoint subscribes) ----

    pub(super) fn subscribe_track<T: Transport>(
        &mut self,
        transport: &mut T,
        name: FullTrackName,
        mut handler: Box<dyn SubscribeTrackHandler>,
        attrs: SubscribeAttributes,
    ) -> Status {
        if !self.conn.is_connected() {
            return Status::NotConnected;
        }
        if name.namespace.is_empty() {
            return Status::InvalidParams;
        }
        let hash = name.track_hash();
        if let Err(error) = self.registry.check(&name, &hash) {
            tracing::warn!(conn_id = self.conn.id, track = %name, error = %error, "Subscribe registration failed");
            handler.on_status_changed(SubscribeStatus::RegistrationFailed);
            self.emit(SessionEvent::TrackRegistrationFailed {
                conn_id: self.conn.id,
                name,
                error,
            });
            return Status::InvalidParams;
        }

        let subscribe_id = self.next_subscribe_id;
        let priority = attrs.priority.unwrap_or(self.config.default_priority);
        let message = ControlMessage::Subscribe(Subscribe {
            subscribe_id,
            track_alias: hash.full_hash,
            namespace: name.namespace.clone(),
            name: name.name.clone(),
            priority,
            filter: attrs.filter,
            params: Vec::new(),
        });
        if let Err(e) = self.send_control(transport, message) {
            tracing::warn!(conn_id = self.conn.id, track = %name, error = %e, "Subscribe send failed");
            return Status::InternalError;
        }
        self.next_subscribe_id += 1;

        let mut track = SubscribeTrackEntry::new(name.clone(), handler);
        track.subscribe_id = Some(subscribe_id);
        track.set_status(SubscribeStatus::PendingResponse);
        if self.registry.register(TrackEntry::Subscribe(track)).is_err() {
            return Status::InternalError;
        }
        let deadline = self.now + self.config.subscribe_ttl;
        self.subscribes.insert(
            subscribe_id,
            SubscribeEntry::new(subscribe_id, hash, priority, attrs.filter, deadline),
        );

        tracing::info!(
            conn_id = self.conn.id,
            subscribe_id = subscribe_id,
            track = %name,
            track_alias = hash.full_hash,
            "Subscribing"
        );
        Status::Ready
    }

    pub(super) fn unsubscribe_track<T: Transport>(
        &mut self,
        transport: &mut T,
        name: &FullTrackName,
    ) -> Status {
        if !self.conn.is_connected() {
            return Status::NotConnected;
        }
        let Some(hash) = self.registry.lookup_name(name) else {
            return Status::Ready;
        };
        let Some(subscribe_id) = self
            .registry
            .subscribe_mut(hash.full_hash)
            .and_then(|track| track.subscribe_id)
        else {
            return Status::InvalidParams;
        };
        tracing::info!(conn_id = self.conn.id, subscribe_id = subscribe_id, track = %name, "Unsubscribing");
        self.finish_subscribe(transport, subscribe_id, SubscribeStatus::NotSubscribed, true);
        Status::Ready
    }

    /// Close one of our subscriptions and drop its track entry
    pub(super) fn finish_subscribe<T: Transport>(
        &mut self,
        transport: &mut T,
        subscribe_id: u64,
        status: SubscribeStatus,
        send_unsubscribe: bool,
    ) {
        let Some(mut entry) = self.subscribes.remove(&subscribe_id) else {
            tracing::debug!(conn_id = self.conn.id, subscribe_id = subscribe_id, "Unknown subscribe id");
            return;
        };
        let finished = match status {
            SubscribeStatus::Rejected { .. } => entry.machine.reject(),
            _ => entry.machine.end(),
        };
        if let Err(state) = finished {
            tracing::debug!(
                conn_id = self.conn.id,
                subscribe_id = subscribe_id,
                state = ?state,
                status = ?status,
                "Subscription finished from unexpected state"
            );
        }
        if send_unsubscribe {
            self.send_control_or_warn(transport, ControlMessage::Unsubscribe { subscribe_id });
        }
        if let Some(TrackEntry::Subscribe(mut track)) = self.registry.unregister(entry.hash.full_hash) {
            track.set_status(status);
        }
    }

    // ---- Publish (this endpoint serves tracks) ----

    pub(super) fn publish_track<T: Transport>(
        &mut self,
        transport: &mut T,
        name: FullTrackName,
        handler: Box<dyn PublishTrackHandler>,
        attrs: PublishAttributes,
        status: TrackStatusCell,
    ) -> Status {
        if !self.conn.is_connected() {
            return Status::NotConnected;
        }
        if name.namespace.is_empty() {
            return Status::InvalidParams;
        }
        let priority = attrs.priority.unwrap_or(self.config.default_priority);
        let track = PublishTrackEntry::new(name.clone(), handler, attrs.mode, priority)
            .with_status_cell(status);
        let hash = match self.registry.register(TrackEntry::Publish(track)) {
            Ok(hash) => hash,
            Err(error) => {
                self.emit(SessionEvent::TrackRegistrationFailed {
                    conn_id: self.conn.id,
                    name,
                    error,
                });
                return Status::InvalidParams;
            }
        };
        tracing::info!(
            conn_id = self.conn.id,
            track = %name,
            track_alias = hash.full_hash,
            mode = ?attrs.mode,
            "Track published"
        );

        if self.conn.role == Role::Client && !self.announces.contains_key(&name.namespace) {
            let announce = self.publish_announce(transport, name.namespace.clone(), Vec::new());
            if announce != Status::Ready {
                tracing::debug!(conn_id = self.conn.id, status = ?announce, "Automatic announce not sent");
            }
        }
        self.refresh_publish(hash.full_hash);
        Status::Ready
    }

    pub(super) fn unpublish_track<T: Transport>(
        &mut self,
        transport: &mut T,
        name: &FullTrackName,
    ) -> Status {
        let Some(hash) = self.registry.lookup_name(name) else {
            return Status::Ready;
        };
        if self.registry.publish_mut(hash.full_hash).is_none() {
            return Status::InvalidParams;
        }

        let peers: Vec<u64> = self
            .peer_subscribes
            .values()
            .filter(|peer| peer.hash.full_hash == hash.full_hash)
            .map(|peer| peer.subscribe_id)
            .collect();
        for subscribe_id in peers {
            self.end_peer_subscription(
                transport,
                subscribe_id,
                SUBSCRIBE_DONE_TRACK_ENDED,
                "track unpublished",
            );
        }

        if let Some(TrackEntry::Publish(mut track)) = self.registry.unregister(hash.full_hash) {
            track.set_status(PublishTrackStatus::NotAnnounced);
        }
        tracing::info!(conn_id = self.conn.id, track = %name, "Track unpublished");
        Status::Ready
    }

    /// Write one object to every live peer subscription of the track
    pub(super) fn publish_object<T: Transport>(
        &mut self,
        transport: &mut T,
        full_hash: u64,
        headers: ObjectHeaders,
        payload: &Bytes,
    ) -> PublishObjectStatus {
        if !self.conn.is_connected() {
            return PublishObjectStatus::NotConnected;
        }
        let conn_id = self.conn.id;
        let Some(track) = self.registry.publish_mut(full_hash) else {
            tracing::debug!(conn_id = conn_id, track_alias = full_hash, "Object for unknown track");
            return PublishObjectStatus::InternalError;
        };

        let status = PublishObjectStatus::from(track.status());
        if status != PublishObjectStatus::Ok {
            if status == PublishObjectStatus::NoSubscribers {
                track.metrics.objects_dropped_no_subscribers += 1;
            }
            tracing::trace!(conn_id = conn_id, track_alias = full_hash, status = ?status, "Object not sent");
            return status;
        }

        let mode = headers.track_mode.unwrap_or(track.mode);
        track.metrics.objects_published += 1;
        track.metrics.bytes_published += payload.len() as u64;

        let mut delivered = 0usize;
        for peer in self.peer_subscribes.values_mut() {
            if peer.hash.full_hash != full_hash || !peer.machine.accepts_objects() {
                continue;
            }
            match peer.writer.write(
                transport,
                mode,
                peer.subscribe_id,
                peer.track_alias,
                track.default_priority,
                &headers,
                payload,
            ) {
                Ok(outcome) => {
                    // accepts_objects() held above
                    if let Err(state) = peer.machine.activate() {
                        tracing::debug!(conn_id = conn_id, subscribe_id = peer.subscribe_id, state = ?state, "Peer subscription not activated");
                    }
                    peer.last_sent = Some((headers.group_id, headers.object_id));
                    self.metrics.objects_sent += 1;
                    self.metrics.bytes_sent += outcome.bytes as u64;
                    if outcome.opened_stream {
                        self.metrics.data_streams_opened += 1;
                        track.metrics.streams_opened += 1;
                    }
                    delivered += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        conn_id = conn_id,
                        subscribe_id = peer.subscribe_id,
                        error = %e,
                        "Object write failed"
                    );
                }
            }
        }

        tracing::trace!(
            conn_id = conn_id,
            track_alias = full_hash,
            group_id = headers.group_id,
            object_id = headers.object_id,
            subscribers = delivered,
            "Object published"
        );
        PublishObjectStatus::Ok
    }

    /// Answer a peer Subscribe (server role, or automatic on the client)
    pub(super) fn resolve_subscribe<T: Transport>(
        &mut self,
        transport: &mut T,
        subscribe_id: u64,
        response: SubscribeResponse,
    ) -> Status {
        if !self.conn.is_connected() {
            return Status::NotConnected;
        }
        let pending = self
            .peer_subscribes
            .get(&subscribe_id)
            .is_some_and(|peer| peer.machine.state() == SubscribeState::Requested);
        if !pending {
            return Status::InvalidParams;
        }

        match response {
            SubscribeResponse::Ok {
                expires_ms,
                largest,
            } => match self.accept_peer_subscribe(transport, subscribe_id, expires_ms, largest) {
                Ok(()) => Status::Ready,
                Err(_) => Status::InternalError,
            },
            SubscribeResponse::Error { code, reason } => {
                let Some(peer) = self.peer_subscribes.remove(&subscribe_id) else {
                    return Status::InvalidParams;
                };
                let message = ControlMessage::SubscribeError {
                    subscribe_id,
                    code,
                    reason,
                    track_alias: peer.track_alias,
                };
                tracing::info!(conn_id = self.conn.id, subscribe_id = subscribe_id, code = code, "Subscribe refused");
                match self.send_control(transport, message) {
                    Ok(()) => Status::Ready,
                    Err(_) => Status::InternalError,
                }
            }
        }
    }

    pub(super) fn accept_peer_subscribe<T: Transport>(
        &mut self,
        transport: &mut T,
        subscribe_id: u64,
        expires_ms: Option<u64>,
        largest: Option<(u64, u64)>,
    ) -> Result<()> {
        let expires_ms = expires_ms.unwrap_or(self.config.subscribe_expires_ms);
        self.send_control(
            transport,
            ControlMessage::SubscribeOk {
                subscribe_id,
                expires_ms,
                largest,
            },
        )?;

        let now = self.now;
        let Some(peer) = self.peer_subscribes.get_mut(&subscribe_id) else {
            return Ok(());
        };
        if let Err(state) = peer.machine.resolve(Duration::from_millis(expires_ms), now) {
            tracing::debug!(conn_id = self.conn.id, subscribe_id = subscribe_id, state = ?state, "Peer subscription already resolved");
            return Ok(());
        }
        let full_hash = peer.hash.full_hash;
        tracing::info!(
            conn_id = self.conn.id,
            subscribe_id = subscribe_id,
            track = %peer.name,
            expires_ms = expires_ms,
            "Peer subscription accepted"
        );
        self.refresh_publish(full_hash);
        Ok(())
    }

    /// End a peer subscription and tell the peer
    pub(super) fn end_peer_subscription<T: Transport>(
        &mut self,
        transport: &mut T,
        subscribe_id: u64,
        status_code: u64,
        reason: &str,
    ) {
        let Some(mut peer) = self.peer_subscribes.remove(&subscribe_id) else {
            return;
        };
        if let Err(state) = peer.machine.end() {
            tracing::debug!(conn_id = self.conn.id, subscribe_id = subscribe_id, state = ?state, "Peer subscription ended before resolve");
        }
        peer.writer.close(transport);
        self.send_control_or_warn(
            transport,
            ControlMessage::SubscribeDone {
                subscribe_id,
                status_code,
                reason: reason.to_string(),
                final_object: peer.last_sent,
            },
        );
        self.refresh_publish(peer.hash.full_hash);
    }

    // ---- Publish status derivation ----

    fn publish_status_for(&self, full_hash: u64, namespace: &TrackNamespace) -> (PublishTrackStatus, u64) {
        if !self.conn.is_connected() {
            return (PublishTrackStatus::NotConnected, 0);
        }
        let subscribers = self
            .peer_subscribes
            .values()
            .filter(|peer| peer.hash.full_hash == full_hash && peer.machine.accepts_objects())
            .count() as u64;
        let ready = if subscribers > 0 {
            PublishTrackStatus::Ok
        } else {
            PublishTrackStatus::NoSubscribers
        };

        let status = match self.conn.role {
            // The server's peer subscribed to what it saw announced
            Role::Server => ready,
            Role::Client => match self.announces.get(namespace).map(|entry| entry.status()) {
                Some(PublishAnnounceStatus::Ok) => ready,
                Some(PublishAnnounceStatus::PendingAnnounceResponse) => {
                    PublishTrackStatus::PendingAnnounceResponse
                }
                Some(PublishAnnounceStatus::AnnounceNotAuthorized) => {
                    PublishTrackStatus::AnnounceNotAuthorized
                }
                Some(PublishAnnounceStatus::SendingUnannounce) => PublishTrackStatus::SendingUnannounce,
                Some(PublishAnnounceStatus::NotAnnounced)
                | Some(PublishAnnounceStatus::NotConnected)
                | None => PublishTrackStatus::NotAnnounced,
            },
        };
        (status, subscribers)
    }

    /// Recompute one publish track's status
    pub(super) fn refresh_publish(&mut self, full_hash: u64) {
        let Some(namespace) = self
            .registry
            .lookup(full_hash)
            .filter(|entry| entry.is_publish())
            .map(|entry| entry.name().namespace.clone())
        else {
            return;
        };
        let (status, subscribers) = self.publish_status_for(full_hash, &namespace);
        if let Some(track) = self.registry.publish_mut(full_hash) {
            track.metrics.subscribers = subscribers;
            track.set_status(status);
        }
    }

    /// Recompute every publish track in a namespace
    pub(super) fn refresh_namespace(&mut self, namespace_hash: u64) {
        let hashes: Vec<u64> = self
            .registry
            .publish_in_namespace(namespace_hash)
            .map(|track| track.hash.full_hash)
            .collect();
        for full_hash in hashes {
            self.refresh_publish(full_hash);
        }
    }
}
