//! QUIC variable-length integers (RFC 9000 Section 16)
//!
//! The two most significant bits of the first byte give the encoded length
//! (1, 2, 4 or 8 bytes); the remaining bits carry the value big-endian.

use bytes::BufMut;

use crate::error::ProtocolError;

/// Maximum value that can be encoded (2^62 - 1)
pub const MAX: u64 = (1u64 << 62) - 1;

/// Encoded length implied by the first byte of a varint
#[inline]
pub fn len_from_first_byte(first: u8) -> usize {
    1 << (first >> 6)
}

/// Number of bytes `value` occupies when encoded
#[inline]
pub fn encoded_len(value: u64) -> usize {
    if value < (1 << 6) {
        1
    } else if value < (1 << 14) {
        2
    } else if value < (1 << 30) {
        4
    } else {
        8
    }
}

/// Decode a varint from the front of `data`
///
/// Returns the value and the number of bytes consumed, or `None` when `data`
/// does not yet hold the whole varint.
pub fn decode(data: &[u8]) -> Option<(u64, usize)> {
    let first = *data.first()?;
    let len = len_from_first_byte(first);
    if data.len() < len {
        return None;
    }

    let mut value = (first & 0x3f) as u64;
    for byte in &data[1..len] {
        value = (value << 8) | (*byte as u64);
    }
    Some((value, len))
}

/// Append `value` to `buf` using the shortest encoding
pub fn encode<B: BufMut>(value: u64, buf: &mut B) -> Result<(), ProtocolError> {
    match encoded_len(value) {
        _ if value > MAX => return Err(ProtocolError::VarintOverflow(value)),
        1 => buf.put_u8(value as u8),
        2 => buf.put_u16(0x4000 | value as u16),
        4 => buf.put_u32(0x8000_0000 | value as u32),
        _ => buf.put_u64(0xc000_0000_0000_0000 | value),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_rfc_examples() {
        // RFC 9000 Appendix A.1
        assert_eq!(
            decode(&[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c]),
            Some((151_288_809_941_952_652, 8))
        );
        assert_eq!(decode(&[0x9d, 0x7f, 0x3e, 0x7d]), Some((494_878_333, 4)));
        assert_eq!(decode(&[0x7b, 0xbd]), Some((15_293, 2)));
        assert_eq!(decode(&[0x25]), Some((37, 1)));
        // Non-minimal encoding of 37
        assert_eq!(decode(&[0x40, 0x25]), Some((37, 2)));
    }

    #[test]
    fn test_encode_boundaries() {
        for (value, len) in [
            (0u64, 1),
            (63, 1),
            (64, 2),
            (16_383, 2),
            (16_384, 4),
            (1_073_741_823, 4),
            (1_073_741_824, 8),
            (MAX, 8),
        ] {
            let mut buf = BytesMut::new();
            encode(value, &mut buf).unwrap();
            assert_eq!(buf.len(), len, "value {}", value);
            assert_eq!(encoded_len(value), len);
            assert_eq!(decode(&buf), Some((value, len)));
        }
    }

    #[test]
    fn test_encode_overflow() {
        let mut buf = BytesMut::new();
        assert_eq!(
            encode(MAX + 1, &mut buf),
            Err(ProtocolError::VarintOverflow(MAX + 1))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete() {
        assert_eq!(decode(&[]), None);
        assert_eq!(decode(&[0x40]), None);
        assert_eq!(decode(&[0x80, 0x00, 0x00]), None);
        assert_eq!(decode(&[0xc0, 0, 0, 0, 0, 0, 0]), None);
    }
}
