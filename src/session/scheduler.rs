//! Fair multiplexed stream reader
//!
//! Once per iteration the scheduler polls the transport for readable
//! streams and services them in this order:
//!
//! 1. the control stream
//! 2. data streams carried over from the previous iteration (budget
//!    exhausted with bytes still buffered), in their prior order
//! 3. every other ready data stream, in round-robin order
//!
//! Each stream gets at most `max_read_bytes` from the transport and at most
//! `read_budget` frames dispatched, so one busy stream cannot starve the
//! rest. Frames are handed to the [`FrameSink`] synchronously before the
//! next stream is touched.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Error, ProtocolError, Result};
use crate::protocol::constants::{
    DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_READ_BYTES, MAX_CONTROL_MESSAGE_SIZE,
    READ_LOOP_MAX_PER_STREAM,
};
use crate::protocol::{FramingResult, RawMessage, StreamBuffer, StreamKind};
use crate::transport::{StreamId, Transport};

/// Receives frames as the scheduler extracts them
pub trait FrameSink<T: Transport> {
    /// Errors are connection-fatal
    fn on_control_frame(&mut self, transport: &mut T, frame: RawMessage) -> Result<()>;

    /// Errors drop only `stream`
    fn on_data_frame(&mut self, transport: &mut T, stream: StreamId, frame: RawMessage)
        -> Result<()>;

    fn on_data_stream_opened(&mut self, stream: StreamId);

    /// `error` is set when the stream was dropped rather than finished
    fn on_data_stream_closed(&mut self, stream: StreamId, error: Option<&Error>);

    fn on_bytes_received(&mut self, bytes: usize);
}

/// Scheduler limits
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Frames dispatched per stream per iteration
    pub read_budget: usize,
    /// Bytes pulled per stream per iteration
    pub max_read_bytes: usize,
    pub max_control_message_size: usize,
    pub max_data_message_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            read_budget: READ_LOOP_MAX_PER_STREAM,
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            max_control_message_size: MAX_CONTROL_MESSAGE_SIZE,
            max_data_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// What one iteration did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationReport {
    pub frames: usize,
    pub control_frames: usize,
    pub streams_serviced: usize,
    pub bytes_read: usize,
    /// Streams that hit the frame budget with bytes left over
    pub budget_exhausted: usize,
    pub streams_closed: usize,
    pub streams_failed: usize,
}

enum Pump {
    /// Waiting for more bytes
    Open,
    /// Budget exhausted with frames still buffered
    CarryOver,
    /// Peer finished the stream at a message boundary
    Finished,
}

/// Per-connection stream scheduler
pub struct StreamScheduler {
    config: SchedulerConfig,
    control_id: StreamId,
    control: StreamBuffer,
    control_carry: bool,
    streams: HashMap<StreamId, StreamBuffer>,
    rotation: VecDeque<StreamId>,
    carryover: VecDeque<StreamId>,
    // Per-iteration scratch, kept to avoid reallocating
    ready: Vec<StreamId>,
    readable: HashSet<StreamId>,
    order: Vec<StreamId>,
}

impl StreamScheduler {
    pub fn new(config: SchedulerConfig, control_id: StreamId) -> Self {
        let control = StreamBuffer::new(StreamKind::Control, config.max_control_message_size);
        Self {
            config,
            control_id,
            control,
            control_carry: false,
            streams: HashMap::new(),
            rotation: VecDeque::new(),
            carryover: VecDeque::new(),
            ready: Vec::new(),
            readable: HashSet::new(),
            order: Vec::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Number of data streams being read
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Streams that will be serviced first next iteration
    pub fn carryover(&self) -> impl Iterator<Item = &StreamId> {
        self.carryover.iter()
    }

    /// Drop every buffer (connection teardown)
    pub fn reset(&mut self) {
        self.control = StreamBuffer::new(StreamKind::Control, self.config.max_control_message_size);
        self.control_carry = false;
        self.streams.clear();
        self.rotation.clear();
        self.carryover.clear();
    }

    /// Run one iteration
    ///
    /// Returns `Err` only for connection-fatal conditions on the control
    /// stream; data stream failures are reported to the sink and counted.
    pub fn service<T, S>(&mut self, transport: &mut T, sink: &mut S) -> Result<IterationReport>
    where
        T: Transport,
        S: FrameSink<T>,
    {
        let mut report = IterationReport::default();

        self.ready.clear();
        transport.poll_readable(&mut self.ready);

        self.readable.clear();
        self.readable.extend(self.ready.iter().copied());

        if self.control_carry || self.readable.remove(&self.control_id) {
            self.service_control(transport, sink, &mut report)?;
        }

        // Newly seen streams join the end of the rotation
        for &id in &self.ready {
            if id != self.control_id && !self.streams.contains_key(&id) {
                self.streams.insert(
                    id,
                    StreamBuffer::new(StreamKind::Data, self.config.max_data_message_size),
                );
                self.rotation.push_back(id);
                sink.on_data_stream_opened(id);
                tracing::trace!(stream_id = id, "Data stream admitted");
            }
        }

        self.order.clear();
        while let Some(id) = self.carryover.pop_front() {
            if self.streams.contains_key(&id) {
                self.readable.remove(&id);
                self.order.push(id);
            }
        }
        for &id in &self.rotation {
            if self.readable.contains(&id) {
                self.order.push(id);
            }
        }
        if !self.rotation.is_empty() {
            self.rotation.rotate_left(1);
        }

        let order = std::mem::take(&mut self.order);
        for &id in &order {
            self.service_data(id, transport, sink, &mut report);
        }
        self.order = order;

        Ok(report)
    }

    fn service_control<T, S>(
        &mut self,
        transport: &mut T,
        sink: &mut S,
        report: &mut IterationReport,
    ) -> Result<()>
    where
        T: Transport,
        S: FrameSink<T>,
    {
        report.streams_serviced += 1;
        let before = report.frames;
        let outcome = pump(
            &mut self.control,
            self.control_id,
            &self.config,
            transport,
            sink,
            report,
        )?;
        report.control_frames += report.frames - before;

        self.control_carry = matches!(outcome, Pump::CarryOver);
        if self.control_carry {
            report.budget_exhausted += 1;
        }
        if matches!(outcome, Pump::Finished) {
            return Err(ProtocolError::ControlStreamClosed.into());
        }
        Ok(())
    }

    fn service_data<T, S>(
        &mut self,
        id: StreamId,
        transport: &mut T,
        sink: &mut S,
        report: &mut IterationReport,
    ) where
        T: Transport,
        S: FrameSink<T>,
    {
        let Some(buffer) = self.streams.get_mut(&id) else {
            return;
        };
        report.streams_serviced += 1;

        match pump(buffer, id, &self.config, transport, sink, report) {
            Ok(Pump::Open) => {}
            Ok(Pump::CarryOver) => {
                report.budget_exhausted += 1;
                self.carryover.push_back(id);
            }
            Ok(Pump::Finished) => {
                report.streams_closed += 1;
                self.remove(id);
                sink.on_data_stream_closed(id, None);
                tracing::trace!(stream_id = id, "Data stream finished");
            }
            Err(e) => {
                report.streams_failed += 1;
                tracing::warn!(stream_id = id, error = %e, "Dropping data stream");
                transport.stop_stream(id);
                self.remove(id);
                sink.on_data_stream_closed(id, Some(&e));
            }
        }
    }

    fn remove(&mut self, id: StreamId) {
        self.streams.remove(&id);
        self.rotation.retain(|s| *s != id);
        self.carryover.retain(|s| *s != id);
    }
}

/// Read then extract up to the frame budget from one stream
fn pump<T, S>(
    buffer: &mut StreamBuffer,
    id: StreamId,
    config: &SchedulerConfig,
    transport: &mut T,
    sink: &mut S,
    report: &mut IterationReport,
) -> Result<Pump>
where
    T: Transport,
    S: FrameSink<T>,
{
    let control = buffer.kind() == StreamKind::Control;

    if !buffer.is_finished() {
        let read = transport.read(id, buffer.backlog_mut(), config.max_read_bytes)?;
        if read.bytes > 0 {
            report.bytes_read += read.bytes;
            sink.on_bytes_received(read.bytes);
        }
        if read.fin {
            buffer.set_finished();
        }
        // Zero-byte guard: readable but nothing delivered
        if read.bytes == 0 && !read.fin && buffer.is_idle() {
            let decision = buffer.try_extract_message();
            debug_assert_eq!(decision, FramingResult::CannotBeEmpty);
            return Err(if control {
                ProtocolError::ControlStreamEmpty
            } else {
                ProtocolError::EmptyDataStream
            }
            .into());
        }
    }

    let mut frames = 0;
    while frames < config.read_budget {
        match buffer.try_extract_message() {
            FramingResult::Complete(raw) => {
                frames += 1;
                report.frames += 1;
                if control {
                    sink.on_control_frame(transport, raw)?;
                } else {
                    sink.on_data_frame(transport, id, raw)?;
                }
            }
            FramingResult::CannotBeEmpty
            | FramingResult::Incomplete { .. }
            | FramingResult::MissingType => break,
            FramingResult::UnsupportedType(msg_type) => {
                return Err(ProtocolError::UnsupportedMessageType { msg_type, control }.into())
            }
            FramingResult::Oversized { len, max } => {
                return Err(ProtocolError::MessageTooLarge { len, max }.into())
            }
        }
    }

    if frames == config.read_budget && !buffer.is_idle() {
        return Ok(Pump::CarryOver);
    }
    if buffer.is_finished() {
        if buffer.is_idle() {
            return Ok(Pump::Finished);
        }
        return Err(ProtocolError::TruncatedStream.into());
    }
    Ok(Pump::Open)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::Writer;
    use crate::protocol::constants::MSG_GROUP_OBJECT;
    use crate::transport::MemoryTransport;
    use bytes::Bytes;

    #[derive(Default)]
    struct Recorder {
        control: Vec<RawMessage>,
        data: Vec<(StreamId, RawMessage)>,
        opened: Vec<StreamId>,
        closed: Vec<(StreamId, bool)>,
        bytes: usize,
    }

    impl FrameSink<MemoryTransport> for Recorder {
        fn on_control_frame(&mut self, _t: &mut MemoryTransport, frame: RawMessage) -> Result<()> {
            self.control.push(frame);
            Ok(())
        }

        fn on_data_frame(
            &mut self,
            _t: &mut MemoryTransport,
            stream: StreamId,
            frame: RawMessage,
        ) -> Result<()> {
            self.data.push((stream, frame));
            Ok(())
        }

        fn on_data_stream_opened(&mut self, stream: StreamId) {
            self.opened.push(stream);
        }

        fn on_data_stream_closed(&mut self, stream: StreamId, error: Option<&Error>) {
            self.closed.push((stream, error.is_some()));
        }

        fn on_bytes_received(&mut self, bytes: usize) {
            self.bytes += bytes;
        }
    }

    fn group_object(object_id: u64) -> Bytes {
        let mut w = Writer::new();
        w.varint(object_id).varint(0);
        w.frame(MSG_GROUP_OBJECT).unwrap()
    }

    fn config(budget: usize) -> SchedulerConfig {
        SchedulerConfig {
            read_budget: budget,
            ..Default::default()
        }
    }

    #[test]
    fn test_budget_bounds_frames_per_stream() {
        let (mut peer, mut local) = MemoryTransport::pair();
        let mut streams = Vec::new();
        for _ in 0..3 {
            let id = peer.open_uni_stream().unwrap();
            for i in 0..10 {
                peer.send(id, group_object(i)).unwrap();
            }
            streams.push(id);
        }

        let mut scheduler = StreamScheduler::new(config(4), 0);
        let mut sink = Recorder::default();
        let report = scheduler.service(&mut local, &mut sink).unwrap();

        assert_eq!(report.frames, 12);
        assert_eq!(report.budget_exhausted, 3);
        for id in &streams {
            assert_eq!(sink.data.iter().filter(|(s, _)| s == id).count(), 4);
        }
        assert_eq!(scheduler.carryover().count(), 3);
    }

    #[test]
    fn test_carryover_serviced_before_new_streams() {
        let (mut peer, mut local) = MemoryTransport::pair();
        let busy = peer.open_uni_stream().unwrap();
        for i in 0..4 {
            peer.send(busy, group_object(i)).unwrap();
        }

        let mut scheduler = StreamScheduler::new(config(2), 0);
        let mut sink = Recorder::default();
        scheduler.service(&mut local, &mut sink).unwrap();
        assert_eq!(sink.data.len(), 2);

        let fresh = peer.open_uni_stream().unwrap();
        peer.send(fresh, group_object(0)).unwrap();
        sink.data.clear();
        scheduler.service(&mut local, &mut sink).unwrap();

        let order: Vec<StreamId> = sink.data.iter().map(|(s, _)| *s).collect();
        assert_eq!(order, vec![busy, busy, fresh]);
    }

    #[test]
    fn test_control_first() {
        let (mut peer, mut local) = MemoryTransport::pair();
        let id = peer.open_uni_stream().unwrap();
        peer.send(id, group_object(0)).unwrap();
        let mut w = Writer::new();
        w.varint(1);
        peer.send(0, w.frame(0x0A).unwrap()).unwrap();

        let mut scheduler = StreamScheduler::new(config(8), 0);
        let mut sink = Recorder::default();
        let report = scheduler.service(&mut local, &mut sink).unwrap();
        assert_eq!(report.control_frames, 1);
        assert_eq!(sink.control.len(), 1);
        assert_eq!(sink.data.len(), 1);
        assert_eq!(sink.opened, vec![id]);
    }

    #[test]
    fn test_fin_closes_stream() {
        let (mut peer, mut local) = MemoryTransport::pair();
        let id = peer.open_uni_stream().unwrap();
        peer.send(id, group_object(0)).unwrap();
        peer.finish_stream(id).unwrap();

        let mut scheduler = StreamScheduler::new(config(8), 0);
        let mut sink = Recorder::default();
        let report = scheduler.service(&mut local, &mut sink).unwrap();
        assert_eq!(report.streams_closed, 1);
        assert_eq!(sink.closed, vec![(id, false)]);
        assert_eq!(scheduler.stream_count(), 0);
    }

    #[test]
    fn test_truncated_stream_is_scoped() {
        let (mut peer, mut local) = MemoryTransport::pair();
        let bad = peer.open_uni_stream().unwrap();
        let frame = group_object(0);
        peer.send(bad, frame.slice(..frame.len() - 1)).unwrap();
        peer.finish_stream(bad).unwrap();
        let good = peer.open_uni_stream().unwrap();
        peer.send(good, group_object(0)).unwrap();

        let mut scheduler = StreamScheduler::new(config(8), 0);
        let mut sink = Recorder::default();
        let report = scheduler.service(&mut local, &mut sink).unwrap();
        assert_eq!(report.streams_failed, 1);
        assert_eq!(sink.closed, vec![(bad, true)]);
        assert_eq!(sink.data.len(), 1);
        assert_eq!(sink.data[0].0, good);
    }

    #[test]
    fn test_unsupported_control_type_is_fatal() {
        let (mut peer, mut local) = MemoryTransport::pair();
        peer.send(0, group_object(0)).unwrap();

        let mut scheduler = StreamScheduler::new(config(8), 0);
        let mut sink = Recorder::default();
        let err = scheduler.service(&mut local, &mut sink).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnsupportedMessageType { control: true, .. })
        ));
    }

    #[test]
    fn test_fragmented_delivery() {
        let (mut peer, local) = MemoryTransport::pair();
        let mut local = local.with_read_chunk(1);
        let id = peer.open_uni_stream().unwrap();
        peer.send(id, group_object(3)).unwrap();

        let mut scheduler = StreamScheduler::new(config(8), 0);
        let mut sink = Recorder::default();
        for _ in 0..8 {
            scheduler.service(&mut local, &mut sink).unwrap();
        }
        assert_eq!(sink.data.len(), 1);
        assert_eq!(sink.bytes, group_object(3).len());
    }
}
