//! Control stream messages
//!
//! Every message is framed as `type | length | payload`; see
//! [`super::buffer`] for boundary detection. Decoding works on a complete
//! [`RawMessage`] and fails with the name of the first bad field.

use bytes::Bytes;

use super::buffer::RawMessage;
use super::codec::{Parameter, Reader, Writer};
use super::constants::*;
use crate::error::ProtocolError;
use crate::registry::TrackNamespace;

/// Endpoint role advertised in ClientSetup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupRole {
    Publisher = 1,
    Subscriber = 2,
    PubSub = 3,
}

impl SetupRole {
    fn from_u64(value: u64) -> Option<Self> {
        match value {
            1 => Some(SetupRole::Publisher),
            2 => Some(SetupRole::Subscriber),
            3 => Some(SetupRole::PubSub),
            _ => None,
        }
    }
}

/// Parameters understood in ClientSetup / ServerSetup
///
/// Unknown parameter types are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupParams {
    pub role: Option<SetupRole>,
    pub path: Option<String>,
    pub endpoint_id: Option<String>,
}

impl SetupParams {
    fn to_params(&self) -> Result<Vec<Parameter>, ProtocolError> {
        let mut params = Vec::new();
        if let Some(role) = self.role {
            params.push(Parameter::varint(PARAM_ROLE, role as u64)?);
        }
        if let Some(path) = &self.path {
            params.push(Parameter::new(PARAM_PATH, Bytes::copy_from_slice(path.as_bytes())));
        }
        if let Some(id) = &self.endpoint_id {
            params.push(Parameter::new(
                PARAM_ENDPOINT_ID,
                Bytes::copy_from_slice(id.as_bytes()),
            ));
        }
        Ok(params)
    }

    fn from_params(message: &'static str, params: Vec<Parameter>) -> Result<Self, ProtocolError> {
        let mut setup = SetupParams::default();
        let text = |value: Bytes, field| {
            String::from_utf8(value.to_vec()).map_err(|_| ProtocolError::Decode { message, field })
        };
        for param in params {
            match param.kind {
                PARAM_ROLE => {
                    let role = param
                        .as_varint()
                        .and_then(SetupRole::from_u64)
                        .ok_or(ProtocolError::Decode {
                            message,
                            field: "role",
                        })?;
                    setup.role = Some(role);
                }
                PARAM_PATH => setup.path = Some(text(param.value, "path")?),
                PARAM_ENDPOINT_ID => setup.endpoint_id = Some(text(param.value, "endpoint_id")?),
                _ => {}
            }
        }
        Ok(setup)
    }
}

/// Which objects a subscription starts (and ends) at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeFilter {
    LatestGroup,
    LatestObject,
    AbsoluteStart {
        group: u64,
        object: u64,
    },
    AbsoluteRange {
        start_group: u64,
        start_object: u64,
        end_group: u64,
        end_object: u64,
    },
}

impl Default for SubscribeFilter {
    fn default() -> Self {
        SubscribeFilter::LatestObject
    }
}

impl SubscribeFilter {
    fn encode(&self, w: &mut Writer) {
        match *self {
            SubscribeFilter::LatestGroup => {
                w.varint(1);
            }
            SubscribeFilter::LatestObject => {
                w.varint(2);
            }
            SubscribeFilter::AbsoluteStart { group, object } => {
                w.varint(3).varint(group).varint(object);
            }
            SubscribeFilter::AbsoluteRange {
                start_group,
                start_object,
                end_group,
                end_object,
            } => {
                w.varint(4)
                    .varint(start_group)
                    .varint(start_object)
                    .varint(end_group)
                    .varint(end_object);
            }
        }
    }

    fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        Ok(match r.varint("filter_type")? {
            1 => SubscribeFilter::LatestGroup,
            2 => SubscribeFilter::LatestObject,
            3 => SubscribeFilter::AbsoluteStart {
                group: r.varint("start_group")?,
                object: r.varint("start_object")?,
            },
            4 => SubscribeFilter::AbsoluteRange {
                start_group: r.varint("start_group")?,
                start_object: r.varint("start_object")?,
                end_group: r.varint("end_group")?,
                end_object: r.varint("end_object")?,
            },
            _ => return Err(r.invalid("filter_type")),
        })
    }
}

/// Subscribe request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub subscribe_id: u64,
    pub track_alias: u64,
    pub namespace: TrackNamespace,
    pub name: Bytes,
    pub priority: u8,
    pub filter: SubscribeFilter,
    pub params: Vec<Parameter>,
}

/// Control stream message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    ClientSetup {
        versions: Vec<u64>,
        params: SetupParams,
    },
    ServerSetup {
        version: u64,
        params: SetupParams,
    },
    Announce {
        namespace: TrackNamespace,
        params: Vec<Parameter>,
    },
    AnnounceOk {
        namespace: TrackNamespace,
    },
    AnnounceError {
        namespace: TrackNamespace,
        code: u64,
        reason: String,
    },
    Unannounce {
        namespace: TrackNamespace,
    },
    AnnounceCancel {
        namespace: TrackNamespace,
    },
    Subscribe(Subscribe),
    SubscribeOk {
        subscribe_id: u64,
        expires_ms: u64,
        /// Largest (group, object) published so far, if any
        largest: Option<(u64, u64)>,
    },
    SubscribeError {
        subscribe_id: u64,
        code: u64,
        reason: String,
        track_alias: u64,
    },
    Unsubscribe {
        subscribe_id: u64,
    },
    SubscribeDone {
        subscribe_id: u64,
        status_code: u64,
        reason: String,
        final_object: Option<(u64, u64)>,
    },
    GoAway {
        new_session_uri: String,
    },
}

fn put_optional_position(w: &mut Writer, position: Option<(u64, u64)>) {
    match position {
        Some((group, object)) => {
            w.u8(1).varint(group).varint(object);
        }
        None => {
            w.u8(0);
        }
    }
}

fn get_optional_position(
    r: &mut Reader,
    group_field: &'static str,
    object_field: &'static str,
) -> Result<Option<(u64, u64)>, ProtocolError> {
    match r.u8("content_exists")? {
        0 => Ok(None),
        1 => Ok(Some((r.varint(group_field)?, r.varint(object_field)?))),
        _ => Err(r.invalid("content_exists")),
    }
}

impl ControlMessage {
    /// Wire type code
    pub fn msg_type(&self) -> u64 {
        match self {
            ControlMessage::ClientSetup { .. } => MSG_CLIENT_SETUP,
            ControlMessage::ServerSetup { .. } => MSG_SERVER_SETUP,
            ControlMessage::Announce { .. } => MSG_ANNOUNCE,
            ControlMessage::AnnounceOk { .. } => MSG_ANNOUNCE_OK,
            ControlMessage::AnnounceError { .. } => MSG_ANNOUNCE_ERROR,
            ControlMessage::Unannounce { .. } => MSG_UNANNOUNCE,
            ControlMessage::AnnounceCancel { .. } => MSG_ANNOUNCE_CANCEL,
            ControlMessage::Subscribe(_) => MSG_SUBSCRIBE,
            ControlMessage::SubscribeOk { .. } => MSG_SUBSCRIBE_OK,
            ControlMessage::SubscribeError { .. } => MSG_SUBSCRIBE_ERROR,
            ControlMessage::Unsubscribe { .. } => MSG_UNSUBSCRIBE,
            ControlMessage::SubscribeDone { .. } => MSG_SUBSCRIBE_DONE,
            ControlMessage::GoAway { .. } => MSG_GOAWAY,
        }
    }

    /// Message name for logs and decode errors
    pub fn name(&self) -> &'static str {
        type_name(self.msg_type())
    }

    /// Encode including the `type | length` envelope
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut w = Writer::new();
        match self {
            ControlMessage::ClientSetup { versions, params } => {
                w.varint(versions.len() as u64);
                for v in versions {
                    w.varint(*v);
                }
                w.params(&params.to_params()?);
            }
            ControlMessage::ServerSetup { version, params } => {
                w.varint(*version).params(&params.to_params()?);
            }
            ControlMessage::Announce { namespace, params } => {
                w.namespace(namespace).params(params);
            }
            ControlMessage::AnnounceOk { namespace }
            | ControlMessage::Unannounce { namespace }
            | ControlMessage::AnnounceCancel { namespace } => {
                w.namespace(namespace);
            }
            ControlMessage::AnnounceError {
                namespace,
                code,
                reason,
            } => {
                w.namespace(namespace).varint(*code).bytes(reason.as_bytes());
            }
            ControlMessage::Subscribe(sub) => {
                w.varint(sub.subscribe_id)
                    .varint(sub.track_alias)
                    .namespace(&sub.namespace)
                    .bytes(&sub.name)
                    .u8(sub.priority);
                sub.filter.encode(&mut w);
                w.params(&sub.params);
            }
            ControlMessage::SubscribeOk {
                subscribe_id,
                expires_ms,
                largest,
            } => {
                w.varint(*subscribe_id).varint(*expires_ms);
                put_optional_position(&mut w, *largest);
            }
            ControlMessage::SubscribeError {
                subscribe_id,
                code,
                reason,
                track_alias,
            } => {
                w.varint(*subscribe_id)
                    .varint(*code)
                    .bytes(reason.as_bytes())
                    .varint(*track_alias);
            }
            ControlMessage::Unsubscribe { subscribe_id } => {
                w.varint(*subscribe_id);
            }
            ControlMessage::SubscribeDone {
                subscribe_id,
                status_code,
                reason,
                final_object,
            } => {
                w.varint(*subscribe_id)
                    .varint(*status_code)
                    .bytes(reason.as_bytes());
                put_optional_position(&mut w, *final_object);
            }
            ControlMessage::GoAway { new_session_uri } => {
                w.bytes(new_session_uri.as_bytes());
            }
        }
        w.frame(self.msg_type())
    }

    /// Decode a complete control message
    pub fn decode(raw: RawMessage) -> Result<Self, ProtocolError> {
        let name = type_name(raw.msg_type);
        let mut r = Reader::new(name, raw.payload);

        let msg = match raw.msg_type {
            MSG_CLIENT_SETUP => {
                let count = r.varint("versions")?;
                if count == 0 || count > r.remaining() as u64 {
                    return Err(r.invalid("versions"));
                }
                let mut versions = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    versions.push(r.varint("versions")?);
                }
                let params = SetupParams::from_params(name, r.params("params")?)?;
                ControlMessage::ClientSetup { versions, params }
            }
            MSG_SERVER_SETUP => {
                let version = r.varint("selected_version")?;
                let params = SetupParams::from_params(name, r.params("params")?)?;
                ControlMessage::ServerSetup { version, params }
            }
            MSG_ANNOUNCE => ControlMessage::Announce {
                namespace: r.namespace("namespace")?,
                params: r.params("params")?,
            },
            MSG_ANNOUNCE_OK => ControlMessage::AnnounceOk {
                namespace: r.namespace("namespace")?,
            },
            MSG_ANNOUNCE_ERROR => ControlMessage::AnnounceError {
                namespace: r.namespace("namespace")?,
                code: r.varint("error_code")?,
                reason: r.string("reason")?,
            },
            MSG_UNANNOUNCE => ControlMessage::Unannounce {
                namespace: r.namespace("namespace")?,
            },
            MSG_ANNOUNCE_CANCEL => ControlMessage::AnnounceCancel {
                namespace: r.namespace("namespace")?,
            },
            MSG_SUBSCRIBE => ControlMessage::Subscribe(Subscribe {
                subscribe_id: r.varint("subscribe_id")?,
                track_alias: r.varint("track_alias")?,
                namespace: r.namespace("namespace")?,
                name: r.bytes("track_name")?,
                priority: r.u8("priority")?,
                filter: SubscribeFilter::decode(&mut r)?,
                params: r.params("params")?,
            }),
            MSG_SUBSCRIBE_OK => ControlMessage::SubscribeOk {
                subscribe_id: r.varint("subscribe_id")?,
                expires_ms: r.varint("expires")?,
                largest: get_optional_position(&mut r, "largest_group", "largest_object")?,
            },
            MSG_SUBSCRIBE_ERROR => ControlMessage::SubscribeError {
                subscribe_id: r.varint("subscribe_id")?,
                code: r.varint("error_code")?,
                reason: r.string("reason")?,
                track_alias: r.varint("track_alias")?,
            },
            MSG_UNSUBSCRIBE => ControlMessage::Unsubscribe {
                subscribe_id: r.varint("subscribe_id")?,
            },
            MSG_SUBSCRIBE_DONE => ControlMessage::SubscribeDone {
                subscribe_id: r.varint("subscribe_id")?,
                status_code: r.varint("status_code")?,
                reason: r.string("reason")?,
                final_object: get_optional_position(&mut r, "final_group", "final_object")?,
            },
            MSG_GOAWAY => ControlMessage::GoAway {
                new_session_uri: r.string("new_session_uri")?,
            },
            other => {
                return Err(ProtocolError::UnsupportedMessageType {
                    msg_type: other,
                    control: true,
                })
            }
        };

        r.finish()?;
        Ok(msg)
    }
}

/// Human-readable name for a control message type
pub fn type_name(msg_type: u64) -> &'static str {
    match msg_type {
        MSG_SUBSCRIBE => "Subscribe",
        MSG_SUBSCRIBE_OK => "SubscribeOk",
        MSG_SUBSCRIBE_ERROR => "SubscribeError",
        MSG_ANNOUNCE => "Announce",
        MSG_ANNOUNCE_OK => "AnnounceOk",
        MSG_ANNOUNCE_ERROR => "AnnounceError",
        MSG_UNANNOUNCE => "Unannounce",
        MSG_UNSUBSCRIBE => "Unsubscribe",
        MSG_SUBSCRIBE_DONE => "SubscribeDone",
        MSG_ANNOUNCE_CANCEL => "AnnounceCancel",
        MSG_GOAWAY => "GoAway",
        MSG_CLIENT_SETUP => "ClientSetup",
        MSG_SERVER_SETUP => "ServerSetup",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::buffer::{FramingResult, StreamBuffer, StreamKind};

    fn reframe(encoded: Bytes) -> RawMessage {
        let mut buf = StreamBuffer::new(StreamKind::Control, MAX_CONTROL_MESSAGE_SIZE);
        buf.append(&encoded);
        match buf.try_extract_message() {
            FramingResult::Complete(raw) => raw,
            other => panic!("expected complete frame, got {:?}", other),
        }
    }

    #[test]
    fn test_client_setup() {
        let msg = ControlMessage::ClientSetup {
            versions: vec![MOQT_VERSION],
            params: SetupParams {
                role: Some(SetupRole::PubSub),
                path: Some("/relay".into()),
                endpoint_id: Some("client-1".into()),
            },
        };
        let decoded = ControlMessage::decode(reframe(msg.encode().unwrap())).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.name(), "ClientSetup");
    }

    #[test]
    fn test_subscribe_with_range_filter() {
        let msg = ControlMessage::Subscribe(Subscribe {
            subscribe_id: 1,
            track_alias: 0x3fff_ffff_ffff,
            namespace: TrackNamespace::from_strs(&["live", "room"]),
            name: Bytes::from_static(b"video"),
            priority: 3,
            filter: SubscribeFilter::AbsoluteRange {
                start_group: 10,
                start_object: 0,
                end_group: 20,
                end_object: 5,
            },
            params: vec![],
        });
        let decoded = ControlMessage::decode(reframe(msg.encode().unwrap())).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_subscribe_ok_content_exists() {
        let msg = ControlMessage::SubscribeOk {
            subscribe_id: 4,
            expires_ms: 2_000,
            largest: Some((7, 9)),
        };
        assert_eq!(
            ControlMessage::decode(reframe(msg.encode().unwrap())).unwrap(),
            msg
        );
    }

    #[test]
    fn test_truncated_subscribe_ok_names_field() {
        // subscribe_id only; expires missing
        let raw = RawMessage {
            msg_type: MSG_SUBSCRIBE_OK,
            payload: Bytes::from_static(&[0x04]),
        };
        assert_eq!(
            ControlMessage::decode(raw),
            Err(ProtocolError::Decode {
                message: "SubscribeOk",
                field: "expires"
            })
        );
    }

    #[test]
    fn test_bad_content_exists_flag() {
        let raw = RawMessage {
            msg_type: MSG_SUBSCRIBE_DONE,
            payload: Bytes::from_static(&[0x01, 0x00, 0x00, 0x07]),
        };
        assert_eq!(
            ControlMessage::decode(raw),
            Err(ProtocolError::Decode {
                message: "SubscribeDone",
                field: "content_exists"
            })
        );
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let raw = RawMessage {
            msg_type: MSG_UNSUBSCRIBE,
            payload: Bytes::from_static(&[0x01, 0x02]),
        };
        assert!(matches!(
            ControlMessage::decode(raw),
            Err(ProtocolError::TrailingBytes { message: "Unsubscribe", remaining: 1 })
        ));
    }

    #[test]
    fn test_client_setup_requires_versions() {
        let raw = RawMessage {
            msg_type: MSG_CLIENT_SETUP,
            payload: Bytes::from_static(&[0x00, 0x00]),
        };
        assert!(matches!(
            ControlMessage::decode(raw),
            Err(ProtocolError::Decode { field: "versions", .. })
        ));
    }

    #[test]
    fn test_unknown_setup_params_skipped() {
        let mut w = Writer::new();
        w.varint(MOQT_VERSION)
            .params(&[Parameter::new(0x99, "ignored"), Parameter::new(PARAM_PATH, "/x")]);
        let raw = reframe(w.frame(MSG_SERVER_SETUP).unwrap());
        let msg = ControlMessage::decode(raw).unwrap();
        assert_eq!(
            msg,
            ControlMessage::ServerSetup {
                version: MOQT_VERSION,
                params: SetupParams {
                    path: Some("/x".into()),
                    ..Default::default()
                }
            }
        );
    }

    #[test]
    fn test_announce_error_reason() {
        let msg = ControlMessage::AnnounceError {
            namespace: TrackNamespace::from_strs(&["ns"]),
            code: ANNOUNCE_ERROR_UNAUTHORIZED,
            reason: "not allowed".into(),
        };
        assert_eq!(
            ControlMessage::decode(reframe(msg.encode().unwrap())).unwrap(),
            msg
        );
    }
}
