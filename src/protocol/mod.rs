//! MoQT wire protocol
//!
//! This module provides:
//! - QUIC varint encoding
//! - Incremental per-stream framing ([`StreamBuffer`])
//! - Control messages ([`ControlMessage`])
//! - Data stream object headers ([`DataMessage`])

pub mod buffer;
pub mod codec;
pub mod constants;
pub mod message;
pub mod object;
pub mod varint;

pub use buffer::{FramingDecision, FramingResult, RawMessage, StreamBuffer, StreamKind};
pub use codec::Parameter;
pub use message::{ControlMessage, SetupParams, SetupRole, Subscribe, SubscribeFilter};
pub use object::{DataMessage, DeliveryCursor, ObjectHeaders, ObjectStatus, TrackMode};
