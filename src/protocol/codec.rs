//! Field-level encoding and decoding
//!
//! [`Reader`] walks the payload of one complete message and names the
//! offending field on failure. [`Writer`] builds a payload and wraps it in the
//! `type | length | payload` envelope.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::varint;
use crate::error::ProtocolError;
use crate::registry::TrackNamespace;

/// Key/value parameter carried by several messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub kind: u64,
    pub value: Bytes,
}

impl Parameter {
    pub fn new(kind: u64, value: impl Into<Bytes>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    /// Parameter whose value is a single varint
    pub fn varint(kind: u64, value: u64) -> Result<Self, ProtocolError> {
        let mut buf = BytesMut::with_capacity(varint::encoded_len(value));
        varint::encode(value, &mut buf)?;
        Ok(Self::new(kind, buf.freeze()))
    }

    /// Interpret the value as a single varint
    pub fn as_varint(&self) -> Option<u64> {
        match varint::decode(&self.value) {
            Some((v, n)) if n == self.value.len() => Some(v),
            _ => None,
        }
    }
}

/// Cursor over the payload of a single message
pub struct Reader {
    buf: Bytes,
    message: &'static str,
}

impl Reader {
    pub fn new(message: &'static str, payload: Bytes) -> Self {
        Self {
            buf: payload,
            message,
        }
    }

    /// Decode error for `field` of this message
    pub fn invalid(&self, field: &'static str) -> ProtocolError {
        ProtocolError::Decode {
            message: self.message,
            field,
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn varint(&mut self, field: &'static str) -> Result<u64, ProtocolError> {
        let (value, len) = varint::decode(&self.buf).ok_or_else(|| self.invalid(field))?;
        self.buf.advance(len);
        Ok(value)
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8, ProtocolError> {
        if self.buf.is_empty() {
            return Err(self.invalid(field));
        }
        Ok(self.buf.get_u8())
    }

    /// Length-prefixed byte field (zero-copy)
    pub fn bytes(&mut self, field: &'static str) -> Result<Bytes, ProtocolError> {
        let len = self.varint(field)?;
        if len > self.buf.len() as u64 {
            return Err(self.invalid(field));
        }
        Ok(self.buf.split_to(len as usize))
    }

    pub fn string(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let raw = self.bytes(field)?;
        String::from_utf8(raw.to_vec()).map_err(|_| self.invalid(field))
    }

    pub fn namespace(&mut self, field: &'static str) -> Result<TrackNamespace, ProtocolError> {
        let count = self.varint(field)?;
        // Every segment needs at least its length byte
        if count > self.buf.len() as u64 {
            return Err(self.invalid(field));
        }
        let mut segments = Vec::with_capacity(count as usize);
        for _ in 0..count {
            segments.push(self.bytes(field)?);
        }
        Ok(TrackNamespace::new(segments))
    }

    pub fn params(&mut self, field: &'static str) -> Result<Vec<Parameter>, ProtocolError> {
        let count = self.varint(field)?;
        if count > self.buf.len() as u64 {
            return Err(self.invalid(field));
        }
        let mut params = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let kind = self.varint(field)?;
            let value = self.bytes(field)?;
            params.push(Parameter { kind, value });
        }
        Ok(params)
    }

    /// Everything left in the payload (zero-copy)
    pub fn rest(&mut self) -> Bytes {
        self.buf.split_off(0)
    }

    /// Fail if any bytes are left unread
    pub fn finish(self) -> Result<(), ProtocolError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::TrailingBytes {
                message: self.message,
                remaining: self.buf.len(),
            })
        }
    }
}

/// Payload builder
///
/// Encoding errors (values outside the varint range) are latched and
/// reported once by [`Writer::frame`].
#[derive(Default)]
pub struct Writer {
    buf: BytesMut,
    error: Option<ProtocolError>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn varint(&mut self, value: u64) -> &mut Self {
        if let Err(e) = varint::encode(value, &mut self.buf) {
            self.error.get_or_insert(e);
        }
        self
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.varint(value.len() as u64);
        self.buf.extend_from_slice(value);
        self
    }

    pub fn namespace(&mut self, namespace: &TrackNamespace) -> &mut Self {
        self.varint(namespace.segments().len() as u64);
        for segment in namespace.segments() {
            self.bytes(segment);
        }
        self
    }

    pub fn params(&mut self, params: &[Parameter]) -> &mut Self {
        self.varint(params.len() as u64);
        for param in params {
            self.varint(param.kind);
            self.bytes(&param.value);
        }
        self
    }

    /// Wrap the payload in the message envelope
    pub fn frame(self, msg_type: u64) -> Result<Bytes, ProtocolError> {
        self.frame_with_trailer(msg_type, 0)
    }

    /// Envelope whose length also covers `trailer_len` bytes the caller
    /// sends separately (an object payload)
    pub fn frame_with_trailer(
        self,
        msg_type: u64,
        trailer_len: usize,
    ) -> Result<Bytes, ProtocolError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let len = (self.buf.len() + trailer_len) as u64;
        let mut out = BytesMut::with_capacity(
            varint::encoded_len(msg_type) + varint::encoded_len(len) + self.buf.len(),
        );
        varint::encode(msg_type, &mut out)?;
        varint::encode(len, &mut out)?;
        out.extend_from_slice(&self.buf);
        Ok(out.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_names_field() {
        let mut reader = Reader::new("Announce", Bytes::from_static(&[0x02, 0x01]));
        let err = reader.namespace("namespace").unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Decode {
                message: "Announce",
                field: "namespace"
            }
        );
    }

    #[test]
    fn test_reader_trailing_bytes() {
        let mut reader = Reader::new("Unsubscribe", Bytes::from_static(&[0x05, 0xff]));
        assert_eq!(reader.varint("subscribe_id").unwrap(), 5);
        assert_eq!(
            reader.finish(),
            Err(ProtocolError::TrailingBytes {
                message: "Unsubscribe",
                remaining: 1
            })
        );
    }

    #[test]
    fn test_writer_frame_envelope() {
        let mut writer = Writer::new();
        writer.varint(7).bytes(b"hi");
        let frame = writer.frame(0x0A).unwrap();
        assert_eq!(&frame[..], &[0x0A, 0x04, 0x07, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_writer_trailer_length() {
        let mut writer = Writer::new();
        writer.varint(1);
        let header = writer.frame_with_trailer(0x53, 100).unwrap();
        // 2-byte type, 2-byte length (101), field
        assert_eq!(&header[..], &[0x40, 0x53, 0x40, 101, 0x01]);
    }

    #[test]
    fn test_writer_latches_overflow() {
        let mut writer = Writer::new();
        writer.varint(u64::MAX).varint(1);
        assert_eq!(
            writer.frame(0x03),
            Err(ProtocolError::VarintOverflow(u64::MAX))
        );
    }

    #[test]
    fn test_namespace_and_params() {
        let ns = TrackNamespace::from_strs(&["a", "bc"]);
        let params = vec![Parameter::varint(0, 3).unwrap(), Parameter::new(1, "/moq")];
        let mut writer = Writer::new();
        writer.namespace(&ns).params(&params);
        let frame = writer.frame(0x06).unwrap();

        // Skip type and length
        let mut reader = Reader::new("Announce", frame.slice(2..));
        assert_eq!(reader.namespace("namespace").unwrap(), ns);
        let decoded = reader.params("params").unwrap();
        assert_eq!(decoded, params);
        assert_eq!(decoded[0].as_varint(), Some(3));
        reader.finish().unwrap();
    }

    #[test]
    fn test_bytes_length_exceeds_payload() {
        let mut reader = Reader::new("GoAway", Bytes::from_static(&[0x09, b'x']));
        assert!(matches!(
            reader.string("new_session_uri"),
            Err(ProtocolError::Decode {
                field: "new_session_uri",
                ..
            })
        ));
    }
}
