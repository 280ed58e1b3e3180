//! Session events delivered to the application

use crate::protocol::{Parameter, SetupParams, SubscribeFilter};
use crate::registry::{FullTrackName, RegistryError, TrackNamespace};
use crate::stats::ConnectionMetrics;

use super::announce::PublishAnnounceStatus;
use super::state::{ConnectionId, ConnectionStatus};

/// Events emitted by a session
///
/// Track-level notifications go to the track handlers instead; these cover
/// the connection and anything the application has to resolve.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Server accepted a new transport
    NewConnection { conn_id: ConnectionId },

    /// Connection status changed
    StatusChanged {
        conn_id: ConnectionId,
        status: ConnectionStatus,
    },

    /// Client received the server's setup
    ServerSetupReceived {
        conn_id: ConnectionId,
        version: u64,
        params: SetupParams,
    },

    /// Server received the client's setup
    ClientSetupReceived {
        conn_id: ConnectionId,
        versions: Vec<u64>,
        params: SetupParams,
    },

    /// A locally announced namespace changed status
    AnnounceStatusChanged {
        conn_id: ConnectionId,
        namespace: TrackNamespace,
        status: PublishAnnounceStatus,
    },

    /// Peer announced a namespace; resolve with `resolve_announce`
    AnnounceReceived {
        conn_id: ConnectionId,
        namespace: TrackNamespace,
        params: Vec<Parameter>,
    },

    /// Peer withdrew an announced namespace
    UnannounceReceived {
        conn_id: ConnectionId,
        namespace: TrackNamespace,
    },

    /// Peer subscribed to a track; resolve with `resolve_subscribe`
    SubscribeReceived {
        conn_id: ConnectionId,
        subscribe_id: u64,
        track_alias: u64,
        name: FullTrackName,
        priority: u8,
        filter: SubscribeFilter,
    },

    /// Peer cancelled a subscription
    UnsubscribeReceived {
        conn_id: ConnectionId,
        subscribe_id: u64,
        name: FullTrackName,
    },

    /// A track could not be added to the registry
    TrackRegistrationFailed {
        conn_id: ConnectionId,
        name: FullTrackName,
        error: RegistryError,
    },

    /// Peer asked us to move to another session
    GoAwayReceived {
        conn_id: ConnectionId,
        new_session_uri: String,
    },

    /// Connection closed because of a protocol violation
    ProtocolViolation {
        conn_id: ConnectionId,
        error: String,
    },

    /// Periodic connection metrics sample
    MetricsSampled {
        conn_id: ConnectionId,
        metrics: ConnectionMetrics,
    },
}

impl SessionEvent {
    pub fn conn_id(&self) -> ConnectionId {
        match self {
            SessionEvent::NewConnection { conn_id }
            | SessionEvent::StatusChanged { conn_id, .. }
            | SessionEvent::ServerSetupReceived { conn_id, .. }
            | SessionEvent::ClientSetupReceived { conn_id, .. }
            | SessionEvent::AnnounceStatusChanged { conn_id, .. }
            | SessionEvent::AnnounceReceived { conn_id, .. }
            | SessionEvent::UnannounceReceived { conn_id, .. }
            | SessionEvent::SubscribeReceived { conn_id, .. }
            | SessionEvent::UnsubscribeReceived { conn_id, .. }
            | SessionEvent::TrackRegistrationFailed { conn_id, .. }
            | SessionEvent::GoAwayReceived { conn_id, .. }
            | SessionEvent::ProtocolViolation { conn_id, .. }
            | SessionEvent::MetricsSampled { conn_id, .. } => *conn_id,
        }
    }
}
