//! Per-stream message framing
//!
//! A [`StreamBuffer`] accumulates the bytes delivered on one stream and
//! detects message boundaries incrementally. Deliveries may be split at any
//! byte (one byte at a time included) and may carry several messages back to
//! back.
//!
//! Each message is `type (varint) | length (varint) | payload[length]`. The
//! buffer consumes the type and length prefixes as soon as they are complete,
//! so a decoded prefix is never parsed twice:
//!
//! ```text
//! WaitingForType ──type──► WaitingForLength ──len──► WaitingForPayload
//!       ▲                                                   │
//!       └──────────────── Complete(RawMessage) ◄────────────┘
//! ```

use bytes::{Buf, Bytes, BytesMut};

use super::constants::{CONTROL_MESSAGE_TYPES, DATA_MESSAGE_TYPES};
use super::varint;

/// Which message set a stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Control,
    Data,
}

impl StreamKind {
    /// Whether `msg_type` is valid on this kind of stream
    pub fn accepts(&self, msg_type: u64) -> bool {
        match self {
            StreamKind::Control => CONTROL_MESSAGE_TYPES.contains(&msg_type),
            StreamKind::Data => DATA_MESSAGE_TYPES.contains(&msg_type),
        }
    }
}

/// One complete, still undecoded message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub msg_type: u64,
    pub payload: Bytes,
}

/// Outcome of one extraction attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingResult {
    /// Prefix decoded, `needed` more payload bytes required
    Incomplete { needed: usize },
    /// A whole message was extracted
    Complete(RawMessage),
    /// Nothing buffered at a message boundary
    CannotBeEmpty,
    /// Type or length prefix itself is incomplete
    MissingType,
    /// Type is not in the stream kind's message set
    UnsupportedType(u64),
    /// Declared length exceeds the buffer's maximum message size
    Oversized { len: u64, max: usize },
}

/// Last framing decision, kept for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingDecision {
    Incomplete,
    Complete,
    CannotBeEmpty,
    MissingType,
    UnsupportedType,
    Oversized,
}

impl From<&FramingResult> for FramingDecision {
    fn from(result: &FramingResult) -> Self {
        match result {
            FramingResult::Incomplete { .. } => FramingDecision::Incomplete,
            FramingResult::Complete(_) => FramingDecision::Complete,
            FramingResult::CannotBeEmpty => FramingDecision::CannotBeEmpty,
            FramingResult::MissingType => FramingDecision::MissingType,
            FramingResult::UnsupportedType(_) => FramingDecision::UnsupportedType,
            FramingResult::Oversized { .. } => FramingDecision::Oversized,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    WaitingForType,
    WaitingForLength { msg_type: u64 },
    WaitingForPayload { msg_type: u64, len: usize },
}

/// Byte accumulator and boundary detector for one stream
#[derive(Debug)]
pub struct StreamBuffer {
    kind: StreamKind,
    backlog: BytesMut,
    state: State,
    max_message_size: usize,
    last_decision: Option<FramingDecision>,
    finished: bool,
    messages_extracted: u64,
}

impl StreamBuffer {
    pub fn new(kind: StreamKind, max_message_size: usize) -> Self {
        Self {
            kind,
            backlog: BytesMut::new(),
            state: State::WaitingForType,
            max_message_size,
            last_decision: None,
            finished: false,
            messages_extracted: 0,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Append delivered bytes
    pub fn append(&mut self, data: &[u8]) {
        self.backlog.extend_from_slice(data);
    }

    /// Backlog for transports that read straight into it
    pub fn backlog_mut(&mut self) -> &mut BytesMut {
        &mut self.backlog
    }

    /// Bytes buffered but not yet consumed by a decoded prefix or message
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// True when sitting at a message boundary with nothing buffered
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::WaitingForType) && self.backlog.is_empty()
    }

    pub fn last_decision(&self) -> Option<FramingDecision> {
        self.last_decision
    }

    pub fn messages_extracted(&self) -> u64 {
        self.messages_extracted
    }

    /// Record that the peer finished the stream
    pub fn set_finished(&mut self) {
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Try to extract the next complete message
    pub fn try_extract_message(&mut self) -> FramingResult {
        let result = self.extract();
        self.last_decision = Some(FramingDecision::from(&result));
        result
    }

    fn extract(&mut self) -> FramingResult {
        loop {
            match self.state {
                State::WaitingForType => {
                    if self.backlog.is_empty() {
                        return FramingResult::CannotBeEmpty;
                    }
                    let Some((msg_type, n)) = varint::decode(&self.backlog) else {
                        return FramingResult::MissingType;
                    };
                    if !self.kind.accepts(msg_type) {
                        return FramingResult::UnsupportedType(msg_type);
                    }
                    self.backlog.advance(n);
                    self.state = State::WaitingForLength { msg_type };
                }
                State::WaitingForLength { msg_type } => {
                    let Some((len, n)) = varint::decode(&self.backlog) else {
                        return FramingResult::MissingType;
                    };
                    if len > self.max_message_size as u64 {
                        return FramingResult::Oversized {
                            len,
                            max: self.max_message_size,
                        };
                    }
                    self.backlog.advance(n);
                    self.state = State::WaitingForPayload {
                        msg_type,
                        len: len as usize,
                    };
                }
                State::WaitingForPayload { msg_type, len } => {
                    if self.backlog.len() < len {
                        self.backlog.reserve(len - self.backlog.len());
                        return FramingResult::Incomplete {
                            needed: len - self.backlog.len(),
                        };
                    }
                    let payload = self.backlog.split_to(len).freeze();
                    self.state = State::WaitingForType;
                    self.messages_extracted += 1;
                    return FramingResult::Complete(RawMessage { msg_type, payload });
                }
            }
        }
    }
}
