//! Framing and scheduling properties

use std::collections::HashMap;
use std::io;

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;

use moqt_rs::error::{Error, ProtocolError, Result};
use moqt_rs::protocol::constants::*;
use moqt_rs::protocol::{
    ControlMessage, DataMessage, FramingResult, ObjectHeaders, ObjectStatus, RawMessage, StreamBuffer, StreamKind,
};
use moqt_rs::protocol::varint;
use moqt_rs::registry::{FullTrackName, SubscribeTrackEntry, SubscribeTrackHandler, TrackEntry, TrackNamespace, TrackRegistry};
use moqt_rs::session::{FrameSink, SchedulerConfig, StreamScheduler};
use moqt_rs::transport::{MemoryTransport, StreamId, StreamRead, Transport, TransportState};

fn control_message() -> impl Strategy<Value = ControlMessage> {
    prop_oneof![
        any::<u32>().prop_map(|id| ControlMessage::Unsubscribe {
            subscribe_id: id as u64
        }),
        (any::<u32>(), any::<u16>(), proptest::option::of((0u64..1000, 0u64..1000))).prop_map(
            |(id, expires, largest)| ControlMessage::SubscribeOk {
                subscribe_id: id as u64,
                expires_ms: expires as u64,
                largest,
            }
        ),
        "[a-z]{0,40}".prop_map(|uri| ControlMessage::GoAway {
            new_session_uri: uri
        }),
        proptest::collection::vec("[a-z0-9]{1,8}", 1..4).prop_map(|segments| {
            ControlMessage::AnnounceOk {
                namespace: TrackNamespace::from_strs(&segments),
            }
        }),
    ]
}

/// Feed `wire` in pieces, extracting after every piece
fn extract_in_chunks(wire: &[u8], chunks: &[usize]) -> Vec<RawMessage> {
    let mut buffer = StreamBuffer::new(StreamKind::Control, MAX_CONTROL_MESSAGE_SIZE);
    let mut out = Vec::new();
    let mut offset = 0;
    let mut sizes = chunks.iter().cycle();

    while offset < wire.len() {
        let size = (*sizes.next().unwrap_or(&1)).max(1);
        let end = (offset + size).min(wire.len());
        buffer.append(&wire[offset..end]);
        offset = end;
        while let FramingResult::Complete(raw) = buffer.try_extract_message() {
            out.push(raw);
        }
    }
    assert!(buffer.is_idle());
    out
}

struct Discard;

impl SubscribeTrackHandler for Discard {
    fn on_object_received(&mut self, _headers: &ObjectHeaders, _payload: Bytes) {}
}

fn track_name() -> impl Strategy<Value = FullTrackName> {
    (
        proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..12), 1..4),
        proptest::collection::vec(any::<u8>(), 0..24),
    )
        .prop_map(|(segments, name)| {
            let namespace = TrackNamespace::new(segments.into_iter().map(Bytes::from).collect());
            FullTrackName::new(namespace, name)
        })
}

proptest! {
    #[test]
    fn prop_track_hash_stable_and_resolvable(name in track_name()) {
        let hash = name.track_hash();
        let copy = FullTrackName::new(name.namespace.clone(), name.name.clone());
        prop_assert_eq!(copy.track_hash(), hash);
        prop_assert!(hash.full_hash <= varint::MAX);

        let mut registry = TrackRegistry::new();
        let registered = registry
            .register(TrackEntry::Subscribe(SubscribeTrackEntry::new(name.clone(), Box::new(Discard))))
            .unwrap();
        prop_assert_eq!(registered, hash);
        prop_assert_eq!(registry.lookup_name(&copy), Some(hash));
        prop_assert!(registry.lookup(hash.full_hash).is_some());
    }

    #[test]
    fn prop_chunk_boundaries_do_not_change_messages(
        messages in proptest::collection::vec(control_message(), 1..12),
        chunks in proptest::collection::vec(1usize..17, 1..8),
    ) {
        let mut wire = Vec::new();
        for message in &messages {
            wire.extend_from_slice(&message.encode().unwrap());
        }

        let whole = extract_in_chunks(&wire, &[wire.len()]);
        let pieces = extract_in_chunks(&wire, &chunks);
        prop_assert_eq!(&whole, &pieces);

        let decoded: Vec<ControlMessage> = pieces
            .into_iter()
            .map(|raw| ControlMessage::decode(raw).unwrap())
            .collect();
        prop_assert_eq!(decoded, messages);
    }

    #[test]
    fn prop_frames_per_stream_bounded_by_budget(
        budget in 1usize..6,
        frames_per_stream in proptest::collection::vec(1usize..20, 1..6),
    ) {
        let (mut sender, mut receiver) = MemoryTransport::pair();
        let mut expected = HashMap::new();
        for &count in &frames_per_stream {
            let stream = sender.open_uni_stream().unwrap();
            for object_id in 0..count {
                sender.send(stream, group_object(object_id as u64)).unwrap();
            }
            expected.insert(stream, count);
        }

        let config = SchedulerConfig { read_budget: budget, ..Default::default() };
        let mut scheduler = StreamScheduler::new(config, receiver.control_stream());
        let mut sink = Log::default();

        let mut total = HashMap::new();
        let mut iterations = 0;
        while total != expected {
            sink.frames.clear();
            let report = scheduler.service(&mut receiver, &mut sink).unwrap();
            iterations += 1;
            prop_assert!(iterations < 100);

            let mut per_stream = HashMap::new();
            for stream in &sink.frames {
                *per_stream.entry(*stream).or_insert(0usize) += 1;
            }
            for (&stream, &count) in &per_stream {
                prop_assert!(count <= budget, "stream {} got {} frames", stream, count);
                *total.entry(stream).or_insert(0usize) += count;
            }
            prop_assert_eq!(report.frames, sink.frames.len());

            // Every stream with frames left is serviced in the first iteration
            if iterations == 1 {
                prop_assert_eq!(per_stream.len(), frames_per_stream.len());
            }
        }

        let slowest = frames_per_stream.iter().max().copied().unwrap_or(0);
        prop_assert_eq!(iterations, slowest.div_ceil(budget));
    }
}

fn group_object(object_id: u64) -> Bytes {
    let message = DataMessage::GroupObject {
        object_id,
        status: ObjectStatus::Normal,
        payload: Bytes::new(),
    };
    message.encode_header().unwrap()
}

#[derive(Default)]
struct Log {
    frames: Vec<StreamId>,
    closed: Vec<(StreamId, Option<String>)>,
}

impl<T: Transport> FrameSink<T> for Log {
    fn on_control_frame(&mut self, _transport: &mut T, _frame: RawMessage) -> Result<()> {
        Ok(())
    }

    fn on_data_frame(&mut self, _transport: &mut T, stream: StreamId, _frame: RawMessage) -> Result<()> {
        self.frames.push(stream);
        Ok(())
    }

    fn on_data_stream_opened(&mut self, _stream: StreamId) {}

    fn on_data_stream_closed(&mut self, stream: StreamId, error: Option<&Error>) {
        self.closed.push((stream, error.map(|e| e.to_string())));
    }

    fn on_bytes_received(&mut self, _bytes: usize) {}
}

/// Reports streams readable but never delivers bytes
struct SpuriousTransport {
    readable: Vec<StreamId>,
    stopped: Vec<StreamId>,
}

impl Transport for SpuriousTransport {
    fn control_stream(&self) -> StreamId {
        0
    }

    fn poll_readable(&mut self, ready: &mut Vec<StreamId>) {
        ready.extend(self.readable.iter().copied());
    }

    fn read(&mut self, _stream: StreamId, _buf: &mut BytesMut, _max: usize) -> io::Result<StreamRead> {
        Ok(StreamRead::default())
    }

    fn send(&mut self, _stream: StreamId, _data: Bytes) -> io::Result<()> {
        Ok(())
    }

    fn open_uni_stream(&mut self) -> io::Result<StreamId> {
        Ok(2)
    }

    fn finish_stream(&mut self, _stream: StreamId) -> io::Result<()> {
        Ok(())
    }

    fn stop_stream(&mut self, stream: StreamId) {
        self.stopped.push(stream);
    }

    fn close(&mut self, _code: u64, _reason: &str) {}

    fn state(&self) -> TransportState {
        TransportState::Open
    }
}

#[test]
fn test_zero_byte_read_on_data_stream_drops_it() {
    let mut transport = SpuriousTransport {
        readable: vec![3],
        stopped: Vec::new(),
    };
    let mut scheduler = StreamScheduler::new(SchedulerConfig::default(), 0);
    let mut sink = Log::default();

    let report = scheduler.service(&mut transport, &mut sink).unwrap();
    assert_eq!(report.streams_failed, 1);
    assert_eq!(transport.stopped, vec![3]);
    assert_eq!(sink.closed.len(), 1);
    assert_eq!(sink.closed[0].0, 3);
    assert!(sink.closed[0].1.is_some());
    assert_eq!(scheduler.stream_count(), 0);
}

#[test]
fn test_zero_byte_read_on_control_stream_is_fatal() {
    let mut transport = SpuriousTransport {
        readable: vec![0],
        stopped: Vec::new(),
    };
    let mut scheduler = StreamScheduler::new(SchedulerConfig::default(), 0);
    let mut sink = Log::default();

    match scheduler.service(&mut transport, &mut sink) {
        Err(Error::Protocol(ProtocolError::ControlStreamEmpty)) => {}
        other => panic!("expected ControlStreamEmpty, got {:?}", other.map(|r| r.frames)),
    }
}
