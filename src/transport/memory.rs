//! In-process transport pair
//!
//! Both ends share one `Mutex`-guarded state. Bytes sent on a stream land in
//! the peer's inbox for that stream id. Stream ids follow the QUIC layout:
//! the control stream is 0, uni streams opened by the first end are 2, 6,
//! 10, ... and by the second end 3, 7, 11, ...

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;

use super::{StreamId, StreamRead, Transport, TransportState};

const CONTROL_STREAM: StreamId = 0;

#[derive(Debug, Default)]
struct StreamQueue {
    data: BytesMut,
    fin: bool,
    stopped: bool,
}

#[derive(Debug)]
struct Closure {
    by: usize,
    code: u64,
    reason: String,
}

#[derive(Debug, Default)]
struct Shared {
    /// Per-end inbox: bytes waiting to be read by that end
    inbox: [BTreeMap<StreamId, StreamQueue>; 2],
    closed: Option<Closure>,
}

/// One end of an in-memory connection
#[derive(Debug)]
pub struct MemoryTransport {
    side: usize,
    shared: Arc<Mutex<Shared>>,
    notify: [Arc<Notify>; 2],
    next_uni: StreamId,
    open_streams: HashSet<StreamId>,
    read_chunk: Option<usize>,
}

impl MemoryTransport {
    /// Create a connected pair; the first end plays the client
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let notify = [Arc::new(Notify::new()), Arc::new(Notify::new())];
        let end = |side: usize| MemoryTransport {
            side,
            shared: shared.clone(),
            notify: notify.clone(),
            next_uni: 2 + side as StreamId,
            open_streams: HashSet::new(),
            read_chunk: None,
        };
        (end(0), end(1))
    }

    /// Deliver at most `chunk` bytes per read, to exercise fragmentation
    pub fn with_read_chunk(mut self, chunk: usize) -> Self {
        self.read_chunk = Some(chunk.max(1));
        self
    }

    fn peer(&self) -> usize {
        1 - self.side
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn not_connected() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "transport closed")
    }
}

impl Transport for MemoryTransport {
    fn control_stream(&self) -> StreamId {
        CONTROL_STREAM
    }

    fn poll_readable(&mut self, ready: &mut Vec<StreamId>) {
        let shared = self.lock();
        for (id, queue) in &shared.inbox[self.side] {
            if !queue.stopped && (!queue.data.is_empty() || queue.fin) {
                ready.push(*id);
            }
        }
    }

    fn read(&mut self, stream: StreamId, buf: &mut BytesMut, max: usize) -> io::Result<StreamRead> {
        let limit = self.read_chunk.map_or(max, |chunk| chunk.min(max));
        let side = self.side;
        let mut shared = self.lock();
        let inbox = &mut shared.inbox[side];

        let Some(queue) = inbox.get_mut(&stream) else {
            return Ok(StreamRead::default());
        };
        let n = limit.min(queue.data.len());
        buf.extend_from_slice(&queue.data.split_to(n));
        let fin = queue.fin && queue.data.is_empty();
        if fin {
            inbox.remove(&stream);
        }
        Ok(StreamRead { bytes: n, fin })
    }

    fn send(&mut self, stream: StreamId, data: Bytes) -> io::Result<()> {
        if stream != CONTROL_STREAM && !self.open_streams.contains(&stream) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("stream {} is not open for sending", stream),
            ));
        }
        let peer = self.peer();
        {
            let mut shared = self.lock();
            if shared.closed.is_some() {
                return Err(Self::not_connected());
            }
            let queue = shared.inbox[peer].entry(stream).or_default();
            if !queue.stopped {
                queue.data.extend_from_slice(&data);
            }
        }
        self.notify[peer].notify_one();
        Ok(())
    }

    fn open_uni_stream(&mut self) -> io::Result<StreamId> {
        if self.lock().closed.is_some() {
            return Err(Self::not_connected());
        }
        let id = self.next_uni;
        self.next_uni += 4;
        self.open_streams.insert(id);
        Ok(id)
    }

    fn finish_stream(&mut self, stream: StreamId) -> io::Result<()> {
        if !self.open_streams.remove(&stream) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("stream {} is not open for sending", stream),
            ));
        }
        let peer = self.peer();
        {
            let mut shared = self.lock();
            if shared.closed.is_some() {
                return Err(Self::not_connected());
            }
            let inbox = &mut shared.inbox[peer];
            let queue = inbox.entry(stream).or_default();
            if queue.stopped {
                inbox.remove(&stream);
            } else {
                queue.fin = true;
            }
        }
        self.notify[peer].notify_one();
        Ok(())
    }

    fn stop_stream(&mut self, stream: StreamId) {
        let side = self.side;
        let mut shared = self.lock();
        let inbox = &mut shared.inbox[side];
        if let Some(queue) = inbox.get_mut(&stream) {
            if queue.fin {
                inbox.remove(&stream);
            } else {
                queue.stopped = true;
                queue.data.clear();
            }
        }
    }

    fn close(&mut self, code: u64, reason: &str) {
        {
            let mut shared = self.lock();
            if shared.closed.is_none() {
                shared.closed = Some(Closure {
                    by: self.side,
                    code,
                    reason: reason.to_string(),
                });
            }
        }
        self.open_streams.clear();
        for notify in &self.notify {
            notify.notify_one();
        }
    }

    fn state(&self) -> TransportState {
        match &self.lock().closed {
            None => TransportState::Open,
            Some(c) if c.by == self.side => TransportState::ClosedLocally,
            Some(c) => TransportState::ClosedByPeer {
                code: c.code,
                reason: c.reason.clone(),
            },
        }
    }

    fn notifier(&self) -> Option<Arc<Notify>> {
        Some(self.notify[self.side].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(t: &mut MemoryTransport, stream: StreamId) -> (Vec<u8>, bool) {
        let mut buf = BytesMut::new();
        let read = t.read(stream, &mut buf, usize::MAX).unwrap();
        (buf.to_vec(), read.fin)
    }

    #[test]
    fn test_control_stream_both_ways() {
        let (mut client, mut server) = MemoryTransport::pair();
        client.send(0, Bytes::from_static(b"hello")).unwrap();
        server.send(0, Bytes::from_static(b"world")).unwrap();

        let mut ready = Vec::new();
        server.poll_readable(&mut ready);
        assert_eq!(ready, vec![0]);
        assert_eq!(read_all(&mut server, 0), (b"hello".to_vec(), false));
        assert_eq!(read_all(&mut client, 0), (b"world".to_vec(), false));
    }

    #[test]
    fn test_uni_stream_ids_and_fin() {
        let (mut client, mut server) = MemoryTransport::pair();
        let a = client.open_uni_stream().unwrap();
        let b = client.open_uni_stream().unwrap();
        assert_eq!((a, b), (2, 6));
        assert_eq!(server.open_uni_stream().unwrap(), 3);

        client.send(a, Bytes::from_static(b"obj")).unwrap();
        client.finish_stream(a).unwrap();
        assert_eq!(read_all(&mut server, a), (b"obj".to_vec(), true));

        // Fully read and finished streams disappear
        let mut ready = Vec::new();
        server.poll_readable(&mut ready);
        assert!(ready.is_empty());

        // Cannot send after finishing
        assert!(client.send(a, Bytes::from_static(b"x")).is_err());
    }

    #[test]
    fn test_read_chunk_fragments() {
        let (mut client, server) = MemoryTransport::pair();
        let mut server = server.with_read_chunk(2);
        client.send(0, Bytes::from_static(b"abcde")).unwrap();

        let mut buf = BytesMut::new();
        assert_eq!(server.read(0, &mut buf, 64).unwrap().bytes, 2);
        assert_eq!(server.read(0, &mut buf, 64).unwrap().bytes, 2);
        assert_eq!(server.read(0, &mut buf, 64).unwrap().bytes, 1);
        assert_eq!(&buf[..], b"abcde");
    }

    #[test]
    fn test_stop_stream_discards() {
        let (mut client, mut server) = MemoryTransport::pair();
        let id = client.open_uni_stream().unwrap();
        client.send(id, Bytes::from_static(b"junk")).unwrap();
        server.stop_stream(id);
        client.send(id, Bytes::from_static(b"more")).unwrap();

        let mut ready = Vec::new();
        server.poll_readable(&mut ready);
        assert!(ready.is_empty());
    }

    #[test]
    fn test_close_visible_to_peer() {
        let (mut client, server) = MemoryTransport::pair();
        client.close(0x10, "idle");
        assert_eq!(client.state(), TransportState::ClosedLocally);
        assert_eq!(
            server.state(),
            TransportState::ClosedByPeer {
                code: 0x10,
                reason: "idle".into()
            }
        );
        assert!(client.send(0, Bytes::new()).is_err());
    }
}
