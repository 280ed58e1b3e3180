//! Inbound message handling
//!
//! The scheduler hands every complete frame to [`SessionCore`] through
//! [`FrameSink`]. Control frames drive setup and the announce / subscribe
//! machines; data frames are matched to a subscription by track alias,
//! ordered across group streams and admitted through the delivery cursor.

use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, ProtocolError, Result};
use crate::protocol::constants::*;
use crate::protocol::{
    ControlMessage, DataMessage, ObjectHeaders, ObjectStatus, Parameter, RawMessage, SetupParams,
    Subscribe,
};
use crate::registry::{FullTrackName, SubscribeStatus, TrackNamespace};
use crate::transport::{StreamId, Transport};

use super::announce::PeerAnnounceState;
use super::engine::SessionCore;
use super::event::SessionEvent;
use super::publish::PeerSubscription;
use super::scheduler::FrameSink;
use super::state::{ConnectionStatus, Role};
use super::subscribe::{Admitted, ObjectRejection};

/// What an inbound data stream has declared so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InboundStream {
    /// Nothing decoded yet
    Fresh,
    /// Carried a single ObjectStream message
    Single,
    Track {
        subscribe_id: u64,
        track_alias: u64,
        priority: u8,
    },
    Group {
        subscribe_id: u64,
        track_alias: u64,
        group_id: u64,
        priority: u8,
    },
}

impl<T: Transport> FrameSink<T> for SessionCore {
    fn on_control_frame(&mut self, transport: &mut T, frame: RawMessage) -> Result<()> {
        let message = ControlMessage::decode(frame)?;
        self.metrics.control_messages_received += 1;
        tracing::debug!(
            conn_id = self.conn.id,
            message = message.name(),
            "Control message received"
        );

        match self.conn.status() {
            ConnectionStatus::Connecting => return self.on_setup_message(transport, message),
            ConnectionStatus::Connected => {}
            _ => return Ok(()),
        }

        match message {
            ControlMessage::ClientSetup { .. } | ControlMessage::ServerSetup { .. } => Err(
                ProtocolError::UnexpectedMessage("setup after connection established").into(),
            ),
            ControlMessage::Announce { namespace, params } => {
                self.on_announce(transport, namespace, params)
            }
            ControlMessage::AnnounceOk { namespace } => {
                self.on_announce_ok(&namespace);
                Ok(())
            }
            ControlMessage::AnnounceError {
                namespace,
                code,
                reason,
            } => {
                tracing::warn!(
                    conn_id = self.conn.id,
                    namespace = %namespace,
                    code = code,
                    reason = %reason,
                    "Announce rejected"
                );
                self.announce_rejected(&namespace);
                Ok(())
            }
            ControlMessage::Unannounce { namespace } => {
                self.on_unannounce(namespace);
                Ok(())
            }
            ControlMessage::AnnounceCancel { namespace } => {
                self.on_announce_cancel(&namespace);
                Ok(())
            }
            ControlMessage::Subscribe(subscribe) => self.on_subscribe(transport, subscribe),
            ControlMessage::SubscribeOk {
                subscribe_id,
                expires_ms,
                largest,
            } => {
                self.on_subscribe_ok(subscribe_id, expires_ms, largest);
                Ok(())
            }
            ControlMessage::SubscribeError {
                subscribe_id,
                code,
                reason,
                ..
            } => {
                tracing::warn!(
                    conn_id = self.conn.id,
                    subscribe_id = subscribe_id,
                    code = code,
                    reason = %reason,
                    "Subscribe rejected"
                );
                self.finish_subscribe(
                    transport,
                    subscribe_id,
                    SubscribeStatus::Rejected { code },
                    false,
                );
                Ok(())
            }
            ControlMessage::Unsubscribe { subscribe_id } => {
                self.on_unsubscribe(transport, subscribe_id);
                Ok(())
            }
            ControlMessage::SubscribeDone {
                subscribe_id,
                status_code,
                reason,
                final_object,
            } => {
                tracing::info!(
                    conn_id = self.conn.id,
                    subscribe_id = subscribe_id,
                    status_code = status_code,
                    reason = %reason,
                    final_object = ?final_object,
                    "Subscription done"
                );
                self.finish_subscribe(transport, subscribe_id, SubscribeStatus::Ended, false);
                Ok(())
            }
            ControlMessage::GoAway { new_session_uri } => {
                tracing::info!(conn_id = self.conn.id, uri = %new_session_uri, "GoAway received");
                self.emit(SessionEvent::GoAwayReceived {
                    conn_id: self.conn.id,
                    new_session_uri,
                });
                Ok(())
            }
        }
    }

    fn on_data_frame(&mut self, _transport: &mut T, stream: StreamId, frame: RawMessage) -> Result<()> {
        let message = DataMessage::decode(frame)?;
        let context = self
            .inbound
            .get(&stream)
            .copied()
            .unwrap_or(InboundStream::Fresh);

        match (context, message) {
            (
                InboundStream::Fresh,
                DataMessage::Object {
                    subscribe_id,
                    track_alias,
                    group_id,
                    object_id,
                    priority,
                    status,
                    payload,
                },
            ) => {
                self.inbound.insert(stream, InboundStream::Single);
                let headers = object_headers(group_id, object_id, priority, status);
                self.deliver(subscribe_id, track_alias, headers, payload);
            }
            (
                InboundStream::Fresh,
                DataMessage::TrackHeader {
                    subscribe_id,
                    track_alias,
                    priority,
                },
            ) => {
                self.inbound.insert(
                    stream,
                    InboundStream::Track {
                        subscribe_id,
                        track_alias,
                        priority,
                    },
                );
            }
            (
                InboundStream::Fresh,
                DataMessage::GroupHeader {
                    subscribe_id,
                    track_alias,
                    group_id,
                    priority,
                },
            ) => {
                self.inbound.insert(
                    stream,
                    InboundStream::Group {
                        subscribe_id,
                        track_alias,
                        group_id,
                        priority,
                    },
                );
                if let Some(entry) = self
                    .subscribes
                    .get_mut(&subscribe_id)
                    .filter(|entry| entry.hash.full_hash == track_alias)
                {
                    entry.open_group(group_id);
                }
            }
            (
                InboundStream::Track {
                    subscribe_id,
                    track_alias,
                    priority,
                },
                DataMessage::TrackObject {
                    group_id,
                    object_id,
                    status,
                    payload,
                },
            ) => {
                let headers = object_headers(group_id, object_id, priority, status);
                self.deliver(subscribe_id, track_alias, headers, payload);
            }
            (
                InboundStream::Group {
                    subscribe_id,
                    track_alias,
                    group_id,
                    priority,
                },
                DataMessage::GroupObject {
                    object_id,
                    status,
                    payload,
                },
            ) => {
                let headers = object_headers(group_id, object_id, priority, status);
                self.deliver(subscribe_id, track_alias, headers, payload);
            }
            (InboundStream::Fresh, _) => return Err(ProtocolError::MissingStreamHeader.into()),
            _ => {
                return Err(
                    ProtocolError::UnexpectedMessage("data message does not match stream header")
                        .into(),
                )
            }
        }
        Ok(())
    }

    fn on_data_stream_opened(&mut self, stream: StreamId) {
        self.conn.data_streams.insert(stream);
        self.metrics.data_streams_accepted += 1;
        tracing::trace!(conn_id = self.conn.id, stream_id = stream, "Data stream accepted");
    }

    fn on_data_stream_closed(&mut self, stream: StreamId, error: Option<&Error>) {
        self.conn.data_streams.remove(&stream);
        if let Some(InboundStream::Group {
            subscribe_id,
            track_alias,
            group_id,
            ..
        }) = self.inbound.remove(&stream)
        {
            self.close_group(subscribe_id, track_alias, group_id);
        }
        if error.is_some() {
            self.metrics.data_stream_errors += 1;
        }
    }

    fn on_bytes_received(&mut self, bytes: usize) {
        self.metrics.bytes_received += bytes as u64;
        self.conn.on_activity(self.now);
    }
}

fn object_headers(group_id: u64, object_id: u64, priority: u8, status: ObjectStatus) -> ObjectHeaders {
    ObjectHeaders::new(group_id, object_id)
        .with_priority(priority)
        .with_status(status)
}

impl SessionCore {
    fn on_setup_message<T: Transport>(&mut self, transport: &mut T, message: ControlMessage) -> Result<()> {
        let conn_id = self.conn.id;
        match (self.conn.role, message) {
            (Role::Server, ControlMessage::ClientSetup { versions, params }) => {
                if !versions.contains(&MOQT_VERSION) {
                    return Err(ProtocolError::VersionMismatch(versions).into());
                }
                self.conn.peer_endpoint_id = params.endpoint_id.clone();
                self.emit(SessionEvent::ClientSetupReceived {
                    conn_id,
                    versions,
                    params,
                });
                let reply = ControlMessage::ServerSetup {
                    version: MOQT_VERSION,
                    params: SetupParams {
                        role: Some(crate::protocol::SetupRole::PubSub),
                        path: None,
                        endpoint_id: Some(self.config.endpoint_id.clone()),
                    },
                };
                self.send_control(transport, reply)?;
                self.on_connected(MOQT_VERSION);
                Ok(())
            }
            (Role::Client, ControlMessage::ServerSetup { version, params }) => {
                if version != MOQT_VERSION {
                    return Err(ProtocolError::VersionMismatch(vec![version]).into());
                }
                self.conn.peer_endpoint_id = params.endpoint_id.clone();
                self.emit(SessionEvent::ServerSetupReceived {
                    conn_id,
                    version,
                    params,
                });
                self.on_connected(version);
                Ok(())
            }
            _ => Err(ProtocolError::UnexpectedMessage("expected setup message").into()),
        }
    }

    fn on_announce<T: Transport>(
        &mut self,
        transport: &mut T,
        namespace: TrackNamespace,
        params: Vec<Parameter>,
    ) -> Result<()> {
        if self.conn.role == Role::Client {
            tracing::debug!(conn_id = self.conn.id, namespace = %namespace, "Refusing peer announce");
            return self.send_control(
                transport,
                ControlMessage::AnnounceError {
                    namespace,
                    code: ANNOUNCE_ERROR_NOT_SUPPORTED,
                    reason: "client does not accept announces".to_string(),
                },
            );
        }

        if self.peer_announces.get(&namespace) == Some(&PeerAnnounceState::Accepted) {
            tracing::debug!(conn_id = self.conn.id, namespace = %namespace, "Repeated announce");
        }
        self.peer_announces
            .insert(namespace.clone(), PeerAnnounceState::Pending);
        self.emit(SessionEvent::AnnounceReceived {
            conn_id: self.conn.id,
            namespace,
            params,
        });
        Ok(())
    }

    fn on_announce_ok(&mut self, namespace: &TrackNamespace) {
        let Some(entry) = self.announces.get_mut(namespace) else {
            tracing::warn!(conn_id = self.conn.id, namespace = %namespace, "AnnounceOk for unknown namespace");
            return;
        };
        if let Err(status) = entry.accept() {
            tracing::warn!(
                conn_id = self.conn.id,
                namespace = %namespace,
                status = ?status,
                "AnnounceOk in wrong state"
            );
            return;
        }
        self.announce_changed(namespace);
    }

    fn on_announce_cancel(&mut self, namespace: &TrackNamespace) {
        let Some(mut entry) = self.announces.remove(namespace) else {
            return;
        };
        tracing::info!(conn_id = self.conn.id, namespace = %namespace, "Announce cancelled by peer");
        if let Err(status) = entry.begin_unannounce().and_then(|()| entry.unannounce_sent()) {
            tracing::debug!(conn_id = self.conn.id, namespace = %namespace, status = ?status, "Cancelled announce was not established");
        }
        self.emit(SessionEvent::AnnounceStatusChanged {
            conn_id: self.conn.id,
            namespace: namespace.clone(),
            status: super::announce::PublishAnnounceStatus::NotAnnounced,
        });
        self.refresh_namespace(namespace.namespace_hash());
    }

    fn on_unannounce(&mut self, namespace: TrackNamespace) {
        if self.peer_announces.remove(&namespace).is_none() {
            tracing::debug!(conn_id = self.conn.id, namespace = %namespace, "Unannounce for unknown namespace");
            return;
        }
        self.emit(SessionEvent::UnannounceReceived {
            conn_id: self.conn.id,
            namespace,
        });
    }

    fn on_subscribe<T: Transport>(&mut self, transport: &mut T, subscribe: Subscribe) -> Result<()> {
        if self.peer_subscribes.contains_key(&subscribe.subscribe_id) {
            return Err(ProtocolError::UnexpectedMessage("duplicate subscribe id").into());
        }
        let conn_id = self.conn.id;
        let name = FullTrackName::new(subscribe.namespace, subscribe.name);
        let peer = PeerSubscription::new(
            subscribe.subscribe_id,
            subscribe.track_alias,
            name.clone(),
            subscribe.priority,
            subscribe.filter,
        );
        tracing::info!(
            conn_id = conn_id,
            subscribe_id = subscribe.subscribe_id,
            track = %name,
            "Subscribe received"
        );

        match self.conn.role {
            Role::Server => {
                self.peer_subscribes.insert(subscribe.subscribe_id, peer);
                self.emit(SessionEvent::SubscribeReceived {
                    conn_id,
                    subscribe_id: subscribe.subscribe_id,
                    track_alias: subscribe.track_alias,
                    name,
                    priority: subscribe.priority,
                    filter: subscribe.filter,
                });
                Ok(())
            }
            Role::Client => {
                let published = self.registry.lookup_name(&name).is_some_and(|hash| {
                    self.registry
                        .lookup(hash.full_hash)
                        .is_some_and(|entry| entry.is_publish())
                });
                if !published {
                    return self.send_control(
                        transport,
                        ControlMessage::SubscribeError {
                            subscribe_id: subscribe.subscribe_id,
                            code: SUBSCRIBE_ERROR_TRACK_NOT_EXIST,
                            reason: "track not published".to_string(),
                            track_alias: subscribe.track_alias,
                        },
                    );
                }
                self.peer_subscribes.insert(subscribe.subscribe_id, peer);
                self.accept_peer_subscribe(transport, subscribe.subscribe_id, None, None)
            }
        }
    }

    fn on_subscribe_ok(&mut self, subscribe_id: u64, expires_ms: u64, largest: Option<(u64, u64)>) {
        let conn_id = self.conn.id;
        let Some(entry) = self.subscribes.get_mut(&subscribe_id) else {
            tracing::warn!(conn_id = conn_id, subscribe_id = subscribe_id, "SubscribeOk for unknown id");
            return;
        };
        if let Err(state) = entry.machine.resolve(Duration::from_millis(expires_ms), self.now) {
            tracing::warn!(
                conn_id = conn_id,
                subscribe_id = subscribe_id,
                state = ?state,
                "SubscribeOk in wrong state"
            );
            return;
        }
        let full_hash = entry.hash.full_hash;
        tracing::info!(
            conn_id = conn_id,
            subscribe_id = subscribe_id,
            expires_ms = expires_ms,
            largest = ?largest,
            "Subscription accepted"
        );
        if let Some(track) = self.registry.subscribe_mut(full_hash) {
            track.set_status(SubscribeStatus::Ok);
        }
    }

    fn on_unsubscribe<T: Transport>(&mut self, transport: &mut T, subscribe_id: u64) {
        let Some(peer) = self.peer_subscribes.get(&subscribe_id) else {
            tracing::debug!(conn_id = self.conn.id, subscribe_id = subscribe_id, "Unsubscribe for unknown id");
            return;
        };
        let name = peer.name.clone();
        self.end_peer_subscription(
            transport,
            subscribe_id,
            SUBSCRIBE_DONE_UNSUBSCRIBED,
            "unsubscribed",
        );
        if self.conn.role == Role::Server {
            self.emit(SessionEvent::UnsubscribeReceived {
                conn_id: self.conn.id,
                subscribe_id,
                name,
            });
        }
    }

    /// Offer an object to its subscription and deliver whatever became ready
    fn deliver(&mut self, subscribe_id: u64, track_alias: u64, headers: ObjectHeaders, payload: Bytes) {
        let known = self.registry.subscribe_mut(track_alias).is_some();
        let entry = self
            .subscribes
            .get_mut(&subscribe_id)
            .filter(|entry| known && entry.hash.full_hash == track_alias);
        let Some(entry) = entry else {
            self.metrics.objects_unknown_track += 1;
            tracing::trace!(
                conn_id = self.conn.id,
                subscribe_id = subscribe_id,
                track_alias = track_alias,
                "Object for unknown track dropped"
            );
            return;
        };

        let mut ready = Vec::new();
        let held = entry.gate.held();
        entry.offer(headers, payload, &mut ready);
        if entry.gate.held() > held {
            tracing::trace!(
                conn_id = self.conn.id,
                track_alias = track_alias,
                group_id = headers.group_id,
                object_id = headers.object_id,
                waiting_for = ?entry.gate.lowest_open(),
                "Object held for earlier group"
            );
        }
        self.hand_off(track_alias, ready);
    }

    /// A group stream ended; deliver objects it was holding back
    fn close_group(&mut self, subscribe_id: u64, track_alias: u64, group_id: u64) {
        let Some(entry) = self
            .subscribes
            .get_mut(&subscribe_id)
            .filter(|entry| entry.hash.full_hash == track_alias)
        else {
            return;
        };
        let mut ready = Vec::new();
        entry.close_group(group_id, &mut ready);
        self.hand_off(track_alias, ready);
    }

    fn hand_off(&mut self, track_alias: u64, ready: Vec<Admitted>) {
        let conn_id = self.conn.id;
        let Some(track) = self.registry.subscribe_mut(track_alias) else {
            return;
        };

        for admitted in ready {
            match admitted {
                Admitted::Deliver(headers, payload) => {
                    self.metrics.objects_received += 1;
                    track.metrics.objects_received += 1;
                    track.metrics.bytes_received += payload.len() as u64;
                    track.metrics.last_delivered = Some((headers.group_id, headers.object_id));
                    tracing::trace!(
                        conn_id = conn_id,
                        track_alias = track_alias,
                        group_id = headers.group_id,
                        object_id = headers.object_id,
                        bytes = payload.len(),
                        "Object delivered"
                    );
                    track.handler.on_object_received(&headers, payload);
                }
                Admitted::Dropped(_, ObjectRejection::NotReady) => {
                    track.metrics.objects_dropped_not_ready += 1;
                }
                Admitted::Dropped(headers, ObjectRejection::OutOfOrder) => {
                    track.metrics.objects_dropped_out_of_order += 1;
                    tracing::debug!(
                        conn_id = conn_id,
                        track_alias = track_alias,
                        group_id = headers.group_id,
                        object_id = headers.object_id,
                        last = ?track.metrics.last_delivered,
                        "Out-of-order object dropped"
                    );
                }
            }
        }
    }
}
