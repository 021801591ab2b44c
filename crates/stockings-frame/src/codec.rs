use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Default maximum message length; yields a 2-byte header.
pub const DEFAULT_MAX_MSG_LEN: usize = 65536;

/// Widest supported length header, in bytes.
pub const MAX_HEADER_WIDTH: usize = 8;

/// Number of bytes used to encode a frame's payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeaderWidth(u8);

impl HeaderWidth {
    /// `max(1, ceil(log2(max_msg_len) / 8))`, capped at [`MAX_HEADER_WIDTH`].
    pub fn for_max_len(max_msg_len: usize) -> Self {
        let bits = if max_msg_len <= 1 {
            0
        } else {
            usize::BITS - (max_msg_len - 1).leading_zeros()
        };
        let bytes = bits.div_ceil(8).clamp(1, MAX_HEADER_WIDTH as u32);
        Self(bytes as u8)
    }

    pub fn bytes(self) -> usize {
        self.0 as usize
    }

    /// Largest length this header can carry.
    pub fn max_len(self) -> usize {
        let bits = 8 * self.bytes();
        if bits >= usize::BITS as usize {
            usize::MAX
        } else {
            (1usize << bits) - 1
        }
    }
}

/// Encoder/decoder for the length-prefixed wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────────┬──────────────────┐
/// │ Length (H bytes, BE) │ Payload          │
/// │                      │ (Length bytes)   │
/// └──────────────────────┴──────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framer {
    header: HeaderWidth,
    max_msg_len: usize,
    limit: usize,
}

impl Framer {
    pub fn new(max_msg_len: usize) -> Result<Self> {
        if max_msg_len == 0 {
            return Err(FrameError::InvalidMaxLen);
        }
        let header = HeaderWidth::for_max_len(max_msg_len);
        Ok(Self {
            header,
            max_msg_len,
            limit: max_msg_len.min(header.max_len()),
        })
    }

    pub fn header_width(&self) -> HeaderWidth {
        self.header
    }

    /// The configured maximum, as given to [`Framer::new`].
    pub fn max_msg_len(&self) -> usize {
        self.max_msg_len
    }

    /// The largest payload this framer accepts: the configured maximum,
    /// narrowed to what the header can represent.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Header plus payload size on the wire.
    pub fn wire_size(&self, payload_len: usize) -> usize {
        self.header.bytes() + payload_len
    }

    /// Reject payloads longer than [`Framer::limit`].
    pub fn check_len(&self, len: usize) -> Result<()> {
        if len > self.limit {
            return Err(FrameError::MessageTooLarge {
                size: len,
                max: self.limit,
            });
        }
        Ok(())
    }

    /// Append one frame to `dst`. On error `dst` is left untouched.
    pub fn encode(&self, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
        self.check_len(payload.len())?;
        dst.reserve(self.wire_size(payload.len()));
        dst.put_uint(payload.len() as u64, self.header.bytes());
        dst.put_slice(payload);
        Ok(())
    }

    /// Encode one frame into a fresh buffer.
    pub fn encode_to_bytes(&self, payload: &[u8]) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(self.wire_size(payload.len()));
        self.encode(payload, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Decode one frame from the front of `src`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched while the header or the
    /// payload is still incomplete. On success, consumes the frame bytes;
    /// later frames stay in `src`, so callers loop until `None`.
    pub fn try_decode(&self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let header = self.header.bytes();
        if src.len() < header {
            return Ok(None); // Need more data
        }

        let announced = (&src[..header]).get_uint(header);
        let payload_len = usize::try_from(announced).unwrap_or(usize::MAX);
        self.check_len(payload_len)?;

        if src.len() - header < payload_len {
            return Ok(None); // Need more data
        }

        src.advance(header);
        Ok(Some(src.split_to(payload_len).freeze()))
    }
}

impl Default for Framer {
    fn default() -> Self {
        let header = HeaderWidth::for_max_len(DEFAULT_MAX_MSG_LEN);
        Self {
            header,
            max_msg_len: DEFAULT_MAX_MSG_LEN,
            limit: DEFAULT_MAX_MSG_LEN.min(header.max_len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_width_from_max_len() {
        assert_eq!(HeaderWidth::for_max_len(1).bytes(), 1);
        assert_eq!(HeaderWidth::for_max_len(255).bytes(), 1);
        assert_eq!(HeaderWidth::for_max_len(256).bytes(), 1);
        assert_eq!(HeaderWidth::for_max_len(257).bytes(), 2);
        assert_eq!(HeaderWidth::for_max_len(65536).bytes(), 2);
        assert_eq!(HeaderWidth::for_max_len(65537).bytes(), 3);
        assert_eq!(HeaderWidth::for_max_len(13_000_000).bytes(), 3);
        assert_eq!(HeaderWidth::for_max_len(usize::MAX).bytes(), 8);
    }

    #[test]
    fn limit_is_narrowed_to_header_capacity() {
        assert_eq!(Framer::new(65536).unwrap().limit(), 65535);
        assert_eq!(Framer::new(256).unwrap().limit(), 255);
        assert_eq!(Framer::new(1000).unwrap().limit(), 1000);
        assert_eq!(Framer::default(), Framer::new(DEFAULT_MAX_MSG_LEN).unwrap());
    }

    #[test]
    fn zero_max_len_rejected() {
        assert!(matches!(Framer::new(0), Err(FrameError::InvalidMaxLen)));
    }

    #[test]
    fn encode_test_message_wire_bytes() {
        let framer = Framer::default();
        let wire = framer.encode_to_bytes(b"Test Message").unwrap();

        assert_eq!(&wire[..2], &[0x00, 0x0c]);
        assert_eq!(&wire[2..], b"Test Message");
        assert_eq!(wire.len(), framer.wire_size(12));
    }

    #[test]
    fn encode_decode_roundtrip() {
        let framer = Framer::new(13_000_000).unwrap();
        let payload = vec![0x5A; 70_000];
        let mut buf = BytesMut::new();

        framer.encode(&payload, &mut buf).unwrap();
        assert_eq!(&buf[..3], &[0x01, 0x11, 0x70]);

        let decoded = framer.try_decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.as_ref(), payload.as_slice());
        assert!(buf.is_empty());
    }

    #[test]
    fn oversize_rejected_and_dst_untouched() {
        let framer = Framer::new(256).unwrap();
        let mut buf = BytesMut::from(&b"keep"[..]);

        let err = framer.encode(&[0u8; 300], &mut buf).unwrap_err();
        assert!(matches!(
            err,
            FrameError::MessageTooLarge { size: 300, max: 255 }
        ));
        assert_eq!(buf.as_ref(), b"keep");
    }

    #[test]
    fn payload_at_limit_accepted() {
        let framer = Framer::new(256).unwrap();
        let wire = framer.encode_to_bytes(&[7u8; 255]).unwrap();
        assert_eq!(wire[0], 0xFF);
        assert_eq!(wire.len(), 256);
    }

    #[test]
    fn decode_incomplete_header() {
        let framer = Framer::new(65536).unwrap();
        let mut buf = BytesMut::from(&[0x00][..]);
        assert!(framer.try_decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.as_ref(), &[0x00]);
    }

    #[test]
    fn decode_incomplete_payload() {
        let framer = Framer::default();
        let mut buf = BytesMut::new();
        framer.encode(b"Test Message", &mut buf).unwrap();
        buf.truncate(5);

        assert!(framer.try_decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 5);
        assert_eq!(&buf[2..], b"Tes");
    }

    #[test]
    fn decode_announced_length_above_limit() {
        let framer = Framer::new(1000).unwrap();
        let mut buf = BytesMut::from(&[0x10, 0x00][..]);

        let err = framer.try_decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            FrameError::MessageTooLarge { size: 4096, max: 1000 }
        ));
    }

    #[test]
    fn multiple_frames_in_one_buffer() {
        let framer = Framer::default();
        let mut buf = BytesMut::new();
        framer.encode(b"first", &mut buf).unwrap();
        framer.encode(b"second", &mut buf).unwrap();

        let first = framer.try_decode(&mut buf).unwrap().unwrap();
        let second = framer.try_decode(&mut buf).unwrap().unwrap();

        assert_eq!(first.as_ref(), b"first");
        assert_eq!(second.as_ref(), b"second");
        assert!(framer.try_decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn empty_payload() {
        let framer = Framer::default();
        let mut buf = BytesMut::new();
        framer.encode(b"", &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x00, 0x00]);

        let decoded = framer.try_decode(&mut buf).unwrap().unwrap();
        assert!(decoded.is_empty());
        assert!(buf.is_empty());
    }
}
