//! Publish side: track handles, peer subscriptions and object writers

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::{DataMessage, ObjectHeaders, ObjectStatus, SubscribeFilter, TrackMode};
use crate::registry::{FullTrackName, PublishTrackStatus, TrackHash, TrackStatusCell};
use crate::transport::{StreamId, Transport};

use super::command::Command;
use super::subscribe::SubscribeMachine;

/// Whether an object could be handed to the connection loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishObjectStatus {
    Ok,
    NotConnected,
    /// Namespace not (yet) announced
    NotAnnounced,
    /// Namespace announce was rejected
    NotAuthorized,
    NoSubscribers,
    InternalError,
}

impl From<PublishTrackStatus> for PublishObjectStatus {
    fn from(status: PublishTrackStatus) -> Self {
        match status {
            PublishTrackStatus::Ok => PublishObjectStatus::Ok,
            PublishTrackStatus::NotConnected => PublishObjectStatus::NotConnected,
            PublishTrackStatus::NotAnnounced
            | PublishTrackStatus::PendingAnnounceResponse
            | PublishTrackStatus::SendingUnannounce => PublishObjectStatus::NotAnnounced,
            PublishTrackStatus::AnnounceNotAuthorized => PublishObjectStatus::NotAuthorized,
            PublishTrackStatus::NoSubscribers => PublishObjectStatus::NoSubscribers,
        }
    }
}

/// Application handle for one published track
///
/// Cheap to clone. Objects are queued to the connection loop; the returned
/// status reflects what the loop last reported for the track.
#[derive(Debug, Clone)]
pub struct PublishTrack {
    name: FullTrackName,
    hash: TrackHash,
    status: TrackStatusCell,
    commands: mpsc::UnboundedSender<Command>,
}

impl PublishTrack {
    pub(crate) fn new(
        name: FullTrackName,
        status: TrackStatusCell,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            hash: name.track_hash(),
            name,
            status,
            commands,
        }
    }

    pub fn name(&self) -> &FullTrackName {
        &self.name
    }

    /// Wire track alias
    pub fn track_alias(&self) -> u64 {
        self.hash.full_hash
    }

    pub fn status(&self) -> PublishTrackStatus {
        self.status.get()
    }

    /// Queue one object for every live subscriber
    pub fn publish_object(&self, headers: ObjectHeaders, payload: Bytes) -> PublishObjectStatus {
        let status = PublishObjectStatus::from(self.status.get());
        if status != PublishObjectStatus::Ok {
            return status;
        }
        let command = Command::PublishObject {
            full_hash: self.hash.full_hash,
            headers,
            payload,
        };
        match self.commands.send(command) {
            Ok(()) => PublishObjectStatus::Ok,
            Err(_) => PublishObjectStatus::NotConnected,
        }
    }
}

/// What one write did on the transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WriteOutcome {
    pub bytes: usize,
    pub opened_stream: bool,
}

/// Maps objects onto data streams according to the track mode
#[derive(Debug, Default)]
pub(crate) struct ObjectWriter {
    stream: Option<StreamId>,
    group: Option<u64>,
}

impl ObjectWriter {
    pub fn stream(&self) -> Option<StreamId> {
        self.stream
    }

    /// Write one object; `priority` goes into stream headers
    #[allow(clippy::too_many_arguments)]
    pub fn write<T: Transport>(
        &mut self,
        transport: &mut T,
        mode: TrackMode,
        subscribe_id: u64,
        track_alias: u64,
        priority: u8,
        headers: &ObjectHeaders,
        payload: &Bytes,
    ) -> Result<WriteOutcome> {
        let result = self.write_inner(
            transport,
            mode,
            subscribe_id,
            track_alias,
            priority,
            headers,
            payload,
        );
        if result.is_err() {
            self.stream = None;
            self.group = None;
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn write_inner<T: Transport>(
        &mut self,
        transport: &mut T,
        mode: TrackMode,
        subscribe_id: u64,
        track_alias: u64,
        priority: u8,
        headers: &ObjectHeaders,
        payload: &Bytes,
    ) -> Result<WriteOutcome> {
        let mut outcome = WriteOutcome::default();

        match mode {
            TrackMode::StreamPerObject => {
                let stream = transport.open_uni_stream()?;
                outcome.opened_stream = true;
                let header = DataMessage::Object {
                    subscribe_id,
                    track_alias,
                    group_id: headers.group_id,
                    object_id: headers.object_id,
                    priority: headers.priority,
                    status: headers.status,
                    payload: payload.clone(),
                };
                outcome.bytes += send_object(transport, stream, &header, payload)?;
                transport.finish_stream(stream)?;
            }
            TrackMode::StreamPerGroup => {
                let stream = match self.stream {
                    Some(stream) if self.group == Some(headers.group_id) => stream,
                    _ => {
                        self.close(transport);
                        let stream = transport.open_uni_stream()?;
                        outcome.opened_stream = true;
                        let header = DataMessage::GroupHeader {
                            subscribe_id,
                            track_alias,
                            group_id: headers.group_id,
                            priority,
                        }
                        .encode_header()?;
                        outcome.bytes += header.len();
                        transport.send(stream, header)?;
                        self.stream = Some(stream);
                        self.group = Some(headers.group_id);
                        stream
                    }
                };
                let object = DataMessage::GroupObject {
                    object_id: headers.object_id,
                    status: headers.status,
                    payload: payload.clone(),
                };
                outcome.bytes += send_object(transport, stream, &object, payload)?;
                if matches!(headers.status, ObjectStatus::EndOfGroup | ObjectStatus::EndOfTrack) {
                    self.close(transport);
                }
            }
            TrackMode::StreamPerTrack => {
                let stream = match self.stream {
                    Some(stream) => stream,
                    None => {
                        let stream = transport.open_uni_stream()?;
                        outcome.opened_stream = true;
                        let header = DataMessage::TrackHeader {
                            subscribe_id,
                            track_alias,
                            priority,
                        }
                        .encode_header()?;
                        outcome.bytes += header.len();
                        transport.send(stream, header)?;
                        self.stream = Some(stream);
                        stream
                    }
                };
                let object = DataMessage::TrackObject {
                    group_id: headers.group_id,
                    object_id: headers.object_id,
                    status: headers.status,
                    payload: payload.clone(),
                };
                outcome.bytes += send_object(transport, stream, &object, payload)?;
                if headers.status == ObjectStatus::EndOfTrack {
                    self.close(transport);
                }
            }
        }

        Ok(outcome)
    }

    /// Finish the open stream, if any
    pub fn close<T: Transport>(&mut self, transport: &mut T) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = transport.finish_stream(stream) {
                tracing::debug!(stream_id = stream, error = %e, "Finish data stream failed");
            }
        }
        self.group = None;
    }
}

/// Send an object header, then its payload as a separate buffer
fn send_object<T: Transport>(
    transport: &mut T,
    stream: StreamId,
    message: &DataMessage,
    payload: &Bytes,
) -> Result<usize> {
    let header = message.encode_header()?;
    let len = header.len() + payload.len();
    transport.send(stream, header)?;
    if !payload.is_empty() {
        transport.send(stream, payload.clone())?;
    }
    Ok(len)
}

/// A subscription the peer holds on one of our tracks
#[derive(Debug)]
pub(crate) struct PeerSubscription {
    pub subscribe_id: u64,
    /// Alias chosen by the subscriber
    pub track_alias: u64,
    pub name: FullTrackName,
    pub hash: TrackHash,
    pub priority: u8,
    pub filter: SubscribeFilter,
    pub machine: SubscribeMachine,
    pub writer: ObjectWriter,
    /// Last (group, object) written, reported in SubscribeDone
    pub last_sent: Option<(u64, u64)>,
}

impl PeerSubscription {
    pub fn new(
        subscribe_id: u64,
        track_alias: u64,
        name: FullTrackName,
        priority: u8,
        filter: SubscribeFilter,
    ) -> Self {
        Self {
            subscribe_id,
            track_alias,
            hash: name.track_hash(),
            name,
            priority,
            filter,
            machine: SubscribeMachine::new(None),
            writer: ObjectWriter::default(),
            last_sent: None,
        }
    }
}
