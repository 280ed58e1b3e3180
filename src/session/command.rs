//! Commands queued from application handles into a connection loop
//!
//! `MoqClient`, `MoqServer` and `PublishTrack` never touch session state
//! directly; they push a [`Command`] and the loop applies it on its next
//! iteration.

use bytes::Bytes;

use crate::protocol::{ObjectHeaders, Parameter, SubscribeFilter, TrackMode};
use crate::registry::{
    FullTrackName, PublishTrackHandler, SubscribeTrackHandler, TrackNamespace, TrackStatusCell,
};

/// Options for an outgoing subscription
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeAttributes {
    /// Subscriber priority; `None` uses the session default
    pub priority: Option<u8>,
    pub filter: SubscribeFilter,
}

impl SubscribeAttributes {
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn filter(mut self, filter: SubscribeFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Options for a published track
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishAttributes {
    pub mode: TrackMode,
    /// Publisher priority; `None` uses the session default
    pub priority: Option<u8>,
}

impl PublishAttributes {
    pub fn mode(mut self, mode: TrackMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Application answer to a peer Announce
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnounceResponse {
    Ok,
    Error { code: u64, reason: String },
}

/// Application answer to a peer Subscribe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeResponse {
    Ok {
        /// Overrides the configured expiry
        expires_ms: Option<u64>,
        largest: Option<(u64, u64)>,
    },
    Error { code: u64, reason: String },
}

impl SubscribeResponse {
    /// Accept with the configured expiry
    pub fn ok() -> Self {
        SubscribeResponse::Ok {
            expires_ms: None,
            largest: None,
        }
    }
}

/// Work for the connection loop
pub enum Command {
    Disconnect,
    PublishAnnounce {
        namespace: TrackNamespace,
        params: Vec<Parameter>,
    },
    PublishUnannounce {
        namespace: TrackNamespace,
    },
    SubscribeTrack {
        name: FullTrackName,
        handler: Box<dyn SubscribeTrackHandler>,
        attrs: SubscribeAttributes,
    },
    UnsubscribeTrack {
        name: FullTrackName,
    },
    PublishTrack {
        name: FullTrackName,
        handler: Box<dyn PublishTrackHandler>,
        attrs: PublishAttributes,
        status: TrackStatusCell,
    },
    UnpublishTrack {
        name: FullTrackName,
    },
    PublishObject {
        full_hash: u64,
        headers: ObjectHeaders,
        payload: Bytes,
    },
    ResolveAnnounce {
        namespace: TrackNamespace,
        response: AnnounceResponse,
    },
    ResolveSubscribe {
        subscribe_id: u64,
        response: SubscribeResponse,
    },
    GoAway {
        new_session_uri: String,
    },
}

impl Command {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Command::Disconnect => "Disconnect",
            Command::PublishAnnounce { .. } => "PublishAnnounce",
            Command::PublishUnannounce { .. } => "PublishUnannounce",
            Command::SubscribeTrack { .. } => "SubscribeTrack",
            Command::UnsubscribeTrack { .. } => "UnsubscribeTrack",
            Command::PublishTrack { .. } => "PublishTrack",
            Command::UnpublishTrack { .. } => "UnpublishTrack",
            Command::PublishObject { .. } => "PublishObject",
            Command::ResolveAnnounce { .. } => "ResolveAnnounce",
            Command::ResolveSubscribe { .. } => "ResolveSubscribe",
            Command::GoAway { .. } => "GoAway",
        }
    }
}
