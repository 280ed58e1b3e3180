//! Data stream messages and object ordering
//!
//! Objects travel on unidirectional streams in one of three layouts,
//! selected by the publisher's [`TrackMode`]:
//!
//! ```text
//! StreamPerObject: ObjectStream
//! StreamPerGroup:  StreamHeaderGroup, GroupObject, GroupObject, ...
//! StreamPerTrack:  StreamHeaderTrack, TrackObject, TrackObject, ...
//! ```
//!
//! Headers are encoded apart from the payload so the payload `Bytes` can be
//! handed to the transport without copying.

use std::time::Duration;

use bytes::Bytes;

use super::buffer::RawMessage;
use super::codec::{Reader, Writer};
use super::constants::*;
use crate::error::ProtocolError;

/// How a publisher maps objects onto streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackMode {
    StreamPerObject,
    #[default]
    StreamPerGroup,
    StreamPerTrack,
}

/// Object status carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectStatus {
    #[default]
    Normal,
    DoesNotExist,
    EndOfGroup,
    EndOfTrack,
}

impl ObjectStatus {
    pub fn as_u64(self) -> u64 {
        match self {
            ObjectStatus::Normal => 0x0,
            ObjectStatus::DoesNotExist => 0x1,
            ObjectStatus::EndOfGroup => 0x3,
            ObjectStatus::EndOfTrack => 0x4,
        }
    }

    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0x0 => Some(ObjectStatus::Normal),
            0x1 => Some(ObjectStatus::DoesNotExist),
            0x3 => Some(ObjectStatus::EndOfGroup),
            0x4 => Some(ObjectStatus::EndOfTrack),
            _ => None,
        }
    }
}

/// Per-object metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectHeaders {
    pub group_id: u64,
    pub object_id: u64,
    pub priority: u8,
    pub status: ObjectStatus,
    /// Local hint, not sent on the wire
    pub ttl: Option<Duration>,
    /// Overrides the track's mode for this object
    pub track_mode: Option<TrackMode>,
}

impl ObjectHeaders {
    pub fn new(group_id: u64, object_id: u64) -> Self {
        Self {
            group_id,
            object_id,
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: ObjectStatus) -> Self {
        self.status = status;
        self
    }
}

/// Data stream message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataMessage {
    /// Whole object on its own stream
    Object {
        subscribe_id: u64,
        track_alias: u64,
        group_id: u64,
        object_id: u64,
        priority: u8,
        status: ObjectStatus,
        payload: Bytes,
    },
    TrackHeader {
        subscribe_id: u64,
        track_alias: u64,
        priority: u8,
    },
    GroupHeader {
        subscribe_id: u64,
        track_alias: u64,
        group_id: u64,
        priority: u8,
    },
    TrackObject {
        group_id: u64,
        object_id: u64,
        status: ObjectStatus,
        payload: Bytes,
    },
    GroupObject {
        object_id: u64,
        status: ObjectStatus,
        payload: Bytes,
    },
}

fn read_status(r: &mut Reader) -> Result<ObjectStatus, ProtocolError> {
    let raw = r.varint("status")?;
    ObjectStatus::from_u64(raw).ok_or_else(|| r.invalid("status"))
}

impl DataMessage {
    pub fn msg_type(&self) -> u64 {
        match self {
            DataMessage::Object { .. } => MSG_OBJECT_STREAM,
            DataMessage::TrackHeader { .. } => MSG_STREAM_HEADER_TRACK,
            DataMessage::GroupHeader { .. } => MSG_STREAM_HEADER_GROUP,
            DataMessage::TrackObject { .. } => MSG_TRACK_OBJECT,
            DataMessage::GroupObject { .. } => MSG_GROUP_OBJECT,
        }
    }

    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            DataMessage::Object { payload, .. }
            | DataMessage::TrackObject { payload, .. }
            | DataMessage::GroupObject { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// Encode everything except the payload
    ///
    /// The envelope length covers the payload, which the caller sends right
    /// after the returned header on the same stream.
    pub fn encode_header(&self) -> Result<Bytes, ProtocolError> {
        let mut w = Writer::new();
        match self {
            DataMessage::Object {
                subscribe_id,
                track_alias,
                group_id,
                object_id,
                priority,
                status,
                ..
            } => {
                w.varint(*subscribe_id)
                    .varint(*track_alias)
                    .varint(*group_id)
                    .varint(*object_id)
                    .u8(*priority)
                    .varint(status.as_u64());
            }
            DataMessage::TrackHeader {
                subscribe_id,
                track_alias,
                priority,
            } => {
                w.varint(*subscribe_id).varint(*track_alias).u8(*priority);
            }
            DataMessage::GroupHeader {
                subscribe_id,
                track_alias,
                group_id,
                priority,
            } => {
                w.varint(*subscribe_id)
                    .varint(*track_alias)
                    .varint(*group_id)
                    .u8(*priority);
            }
            DataMessage::TrackObject {
                group_id,
                object_id,
                status,
                ..
            } => {
                w.varint(*group_id).varint(*object_id).varint(status.as_u64());
            }
            DataMessage::GroupObject {
                object_id, status, ..
            } => {
                w.varint(*object_id).varint(status.as_u64());
            }
        }
        let payload_len = self.payload().map_or(0, |p| p.len());
        w.frame_with_trailer(self.msg_type(), payload_len)
    }

    /// Decode a complete data stream message; payloads are zero-copy slices
    pub fn decode(raw: RawMessage) -> Result<Self, ProtocolError> {
        let msg = match raw.msg_type {
            MSG_OBJECT_STREAM => {
                let mut r = Reader::new("ObjectStream", raw.payload);
                DataMessage::Object {
                    subscribe_id: r.varint("subscribe_id")?,
                    track_alias: r.varint("track_alias")?,
                    group_id: r.varint("group_id")?,
                    object_id: r.varint("object_id")?,
                    priority: r.u8("priority")?,
                    status: read_status(&mut r)?,
                    payload: r.rest(),
                }
            }
            MSG_STREAM_HEADER_TRACK => {
                let mut r = Reader::new("StreamHeaderTrack", raw.payload);
                let msg = DataMessage::TrackHeader {
                    subscribe_id: r.varint("subscribe_id")?,
                    track_alias: r.varint("track_alias")?,
                    priority: r.u8("priority")?,
                };
                r.finish()?;
                msg
            }
            MSG_STREAM_HEADER_GROUP => {
                let mut r = Reader::new("StreamHeaderGroup", raw.payload);
                let msg = DataMessage::GroupHeader {
                    subscribe_id: r.varint("subscribe_id")?,
                    track_alias: r.varint("track_alias")?,
                    group_id: r.varint("group_id")?,
                    priority: r.u8("priority")?,
                };
                r.finish()?;
                msg
            }
            MSG_TRACK_OBJECT => {
                let mut r = Reader::new("TrackObject", raw.payload);
                DataMessage::TrackObject {
                    group_id: r.varint("group_id")?,
                    object_id: r.varint("object_id")?,
                    status: read_status(&mut r)?,
                    payload: r.rest(),
                }
            }
            MSG_GROUP_OBJECT => {
                let mut r = Reader::new("GroupObject", raw.payload);
                DataMessage::GroupObject {
                    object_id: r.varint("object_id")?,
                    status: read_status(&mut r)?,
                    payload: r.rest(),
                }
            }
            other => {
                return Err(ProtocolError::UnsupportedMessageType {
                    msg_type: other,
                    control: false,
                })
            }
        };
        Ok(msg)
    }
}

/// Last delivered (group, object) of a subscription
///
/// Objects are admitted only when strictly after the cursor in
/// lexicographic (group, object) order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryCursor {
    last: Option<(u64, u64)>,
}

impl DeliveryCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to `(group, object)` if it is newer; false means drop
    pub fn admit(&mut self, group_id: u64, object_id: u64) -> bool {
        let next = (group_id, object_id);
        match self.last {
            Some(last) if next <= last => false,
            _ => {
                self.last = Some(next);
                true
            }
        }
    }

    pub fn last(&self) -> Option<(u64, u64)> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::buffer::{FramingResult, StreamBuffer, StreamKind};

    fn frame(msg: &DataMessage) -> RawMessage {
        let mut buf = StreamBuffer::new(StreamKind::Data, DEFAULT_MAX_MESSAGE_SIZE);
        buf.append(&msg.encode_header().unwrap());
        if let Some(payload) = msg.payload() {
            buf.append(payload);
        }
        match buf.try_extract_message() {
            FramingResult::Complete(raw) => raw,
            other => panic!("expected complete frame, got {:?}", other),
        }
    }

    #[test]
    fn test_object_stream_payload_is_zero_copy() {
        let msg = DataMessage::Object {
            subscribe_id: 1,
            track_alias: 99,
            group_id: 4,
            object_id: 2,
            priority: 7,
            status: ObjectStatus::Normal,
            payload: Bytes::from_static(b"frame"),
        };
        let raw = frame(&msg);
        let base = raw.payload.as_ptr() as usize;
        let decoded = DataMessage::decode(raw).unwrap();
        let payload = decoded.payload().unwrap();
        // Payload points into the frame allocation
        assert!(payload.as_ptr() as usize > base);
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_group_stream() {
        let header = DataMessage::GroupHeader {
            subscribe_id: 3,
            track_alias: 1234,
            group_id: 8,
            priority: 1,
        };
        assert_eq!(DataMessage::decode(frame(&header)).unwrap(), header);

        let object = DataMessage::GroupObject {
            object_id: 0,
            status: ObjectStatus::EndOfGroup,
            payload: Bytes::new(),
        };
        assert_eq!(DataMessage::decode(frame(&object)).unwrap(), object);
    }

    #[test]
    fn test_invalid_status_names_field() {
        let raw = RawMessage {
            msg_type: MSG_GROUP_OBJECT,
            payload: Bytes::from_static(&[0x00, 0x02]),
        };
        assert_eq!(
            DataMessage::decode(raw),
            Err(ProtocolError::Decode {
                message: "GroupObject",
                field: "status"
            })
        );
    }

    #[test]
    fn test_header_trailing_bytes() {
        let raw = RawMessage {
            msg_type: MSG_STREAM_HEADER_TRACK,
            payload: Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]),
        };
        assert!(matches!(
            DataMessage::decode(raw),
            Err(ProtocolError::TrailingBytes { .. })
        ));
    }

    #[test]
    fn test_cursor_admits_strictly_increasing() {
        let mut cursor = DeliveryCursor::new();
        assert!(cursor.admit(0, 0));
        assert!(cursor.admit(0, 1));
        // Duplicate
        assert!(!cursor.admit(0, 1));
        // Older object
        assert!(!cursor.admit(0, 0));
        assert!(cursor.admit(1, 0));
        // Older group with a higher object id
        assert!(!cursor.admit(0, 5));
        assert_eq!(cursor.last(), Some((1, 0)));
    }

    #[test]
    fn test_cursor_allows_gaps() {
        let mut cursor = DeliveryCursor::new();
        assert!(cursor.admit(5, 3));
        assert!(cursor.admit(9, 0));
        assert_eq!(cursor.last(), Some((9, 0)));
    }
}
