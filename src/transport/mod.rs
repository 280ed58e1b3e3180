//! Transport abstraction
//!
//! A session runs over any multiplexed, stream-oriented transport that
//! offers one bidirectional control stream plus unidirectional data streams.
//! Calls are non-blocking: the session polls for readable streams once per
//! iteration and reads what is already buffered.
//!
//! [`MemoryTransport`] is an in-process pair for tests and demos.

pub mod memory;

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;

pub use memory::MemoryTransport;

/// Transport-assigned stream identifier
pub type StreamId = u64;

/// Result of one non-blocking read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamRead {
    /// Bytes appended to the caller's buffer
    pub bytes: usize,
    /// Peer finished the stream and everything has been read
    pub fin: bool,
}

/// Connection-level transport state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    Open,
    ClosedLocally,
    ClosedByPeer { code: u64, reason: String },
}

/// Multiplexed stream transport consumed by a session
pub trait Transport: Send {
    /// The bidirectional control stream
    fn control_stream(&self) -> StreamId;

    /// Append the ids of streams with unread bytes or an unreported fin
    fn poll_readable(&mut self, ready: &mut Vec<StreamId>);

    /// Read up to `max` buffered bytes from `stream` into `buf`
    fn read(&mut self, stream: StreamId, buf: &mut BytesMut, max: usize) -> io::Result<StreamRead>;

    /// Queue bytes on a stream, in order
    fn send(&mut self, stream: StreamId, data: Bytes) -> io::Result<()>;

    /// Open a unidirectional stream toward the peer
    fn open_uni_stream(&mut self) -> io::Result<StreamId>;

    /// Finish a locally opened stream
    fn finish_stream(&mut self, stream: StreamId) -> io::Result<()>;

    /// Stop reading a peer stream and discard whatever else arrives on it
    fn stop_stream(&mut self, stream: StreamId);

    /// Close the whole connection
    fn close(&mut self, code: u64, reason: &str);

    fn state(&self) -> TransportState;

    /// Signalled when new data becomes readable
    fn notifier(&self) -> Option<Arc<Notify>> {
        None
    }
}
