//! Protocol constants
//!
//! Message type codes, setup parameter types and error codes for wire
//! format version [`MOQT_VERSION`].

use std::time::Duration;

/// Protocol version offered in ClientSetup and selected in ServerSetup
pub const MOQT_VERSION: u64 = 0xff00_0004;

/// Maximum frames read from one stream per scheduler iteration
pub const READ_LOOP_MAX_PER_STREAM: usize = 60;

/// Maximum bytes pulled from one stream per scheduler iteration
pub const DEFAULT_MAX_READ_BYTES: usize = 64 * 1024;

/// How long a subscribe may stay unanswered before it is rejected locally
pub const DEFAULT_SUBSCRIBE_TTL: Duration = Duration::from_secs(10);

/// Expiry granted in SubscribeOk (0 = until unsubscribed)
pub const DEFAULT_SUBSCRIBE_EXPIRES_MS: u64 = 0;

/// How long an announce may stay unanswered
pub const DEFAULT_ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest control message accepted
pub const MAX_CONTROL_MESSAGE_SIZE: usize = 64 * 1024;

/// Largest data-stream message (object header + payload) accepted
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default publisher priority
pub const DEFAULT_PRIORITY: u8 = 128;

// Control stream message types
pub const MSG_SUBSCRIBE: u64 = 0x03;
pub const MSG_SUBSCRIBE_OK: u64 = 0x04;
pub const MSG_SUBSCRIBE_ERROR: u64 = 0x05;
pub const MSG_ANNOUNCE: u64 = 0x06;
pub const MSG_ANNOUNCE_OK: u64 = 0x07;
pub const MSG_ANNOUNCE_ERROR: u64 = 0x08;
pub const MSG_UNANNOUNCE: u64 = 0x09;
pub const MSG_UNSUBSCRIBE: u64 = 0x0A;
pub const MSG_SUBSCRIBE_DONE: u64 = 0x0B;
pub const MSG_ANNOUNCE_CANCEL: u64 = 0x0C;
pub const MSG_GOAWAY: u64 = 0x10;
pub const MSG_CLIENT_SETUP: u64 = 0x40;
pub const MSG_SERVER_SETUP: u64 = 0x41;

// Data stream message types
pub const MSG_OBJECT_STREAM: u64 = 0x00;
pub const MSG_STREAM_HEADER_TRACK: u64 = 0x50;
pub const MSG_STREAM_HEADER_GROUP: u64 = 0x51;
pub const MSG_TRACK_OBJECT: u64 = 0x52;
pub const MSG_GROUP_OBJECT: u64 = 0x53;

/// Message types accepted on the control stream
pub const CONTROL_MESSAGE_TYPES: [u64; 13] = [
    MSG_SUBSCRIBE,
    MSG_SUBSCRIBE_OK,
    MSG_SUBSCRIBE_ERROR,
    MSG_ANNOUNCE,
    MSG_ANNOUNCE_OK,
    MSG_ANNOUNCE_ERROR,
    MSG_UNANNOUNCE,
    MSG_UNSUBSCRIBE,
    MSG_SUBSCRIBE_DONE,
    MSG_ANNOUNCE_CANCEL,
    MSG_GOAWAY,
    MSG_CLIENT_SETUP,
    MSG_SERVER_SETUP,
];

/// Message types accepted on data streams
pub const DATA_MESSAGE_TYPES: [u64; 5] = [
    MSG_OBJECT_STREAM,
    MSG_STREAM_HEADER_TRACK,
    MSG_STREAM_HEADER_GROUP,
    MSG_TRACK_OBJECT,
    MSG_GROUP_OBJECT,
];

// Setup parameter types
pub const PARAM_ROLE: u64 = 0x00;
pub const PARAM_PATH: u64 = 0x01;
pub const PARAM_ENDPOINT_ID: u64 = 0xF0;

// Subscribe error codes
pub const SUBSCRIBE_ERROR_INTERNAL: u64 = 0x00;
pub const SUBSCRIBE_ERROR_INVALID_RANGE: u64 = 0x01;
pub const SUBSCRIBE_ERROR_TRACK_NOT_EXIST: u64 = 0x03;
pub const SUBSCRIBE_ERROR_UNAUTHORIZED: u64 = 0x04;
pub const SUBSCRIBE_ERROR_TIMEOUT: u64 = 0x05;

// Announce error codes
pub const ANNOUNCE_ERROR_INTERNAL: u64 = 0x00;
pub const ANNOUNCE_ERROR_NOT_SUPPORTED: u64 = 0x01;
pub const ANNOUNCE_ERROR_UNAUTHORIZED: u64 = 0x02;

// SubscribeDone status codes
pub const SUBSCRIBE_DONE_UNSUBSCRIBED: u64 = 0x00;
pub const SUBSCRIBE_DONE_INTERNAL: u64 = 0x01;
pub const SUBSCRIBE_DONE_TRACK_ENDED: u64 = 0x03;
pub const SUBSCRIBE_DONE_GOING_AWAY: u64 = 0x05;
pub const SUBSCRIBE_DONE_EXPIRED: u64 = 0x06;

// Connection close codes passed to the transport
pub const CLOSE_NO_ERROR: u64 = 0x00;
pub const CLOSE_INTERNAL_ERROR: u64 = 0x01;
pub const CLOSE_PROTOCOL_VIOLATION: u64 = 0x03;
pub const CLOSE_IDLE_TIMEOUT: u64 = 0x10;
