//! §4.1 — the 9-byte frame header codec. Pure, stateless: callers set every
//! field of a [`FrameHeader`] and hand it to [`FrameHeader::encode`].

use crate::types::{FrameType, StreamId};
use num_traits::{FromPrimitive, ToPrimitive};

/// The reused scratch frame descriptor (§3's "frame descriptor"). One
/// instance lives in the coordinator and is mutated per write; tests may
/// also build ad-hoc instances to exercise the codec in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: FrameType,
    pub flags: u8,
    pub stream_id: StreamId,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameHeaderParseError {
    #[error("header is shorter than 9 bytes")]
    TooShort,
    #[error("unknown frame type {0:#x}")]
    UnknownFrameType(u8),
}

impl FrameHeader {
    pub fn new(frame_type: FrameType, flags: u8, stream_id: StreamId, length: u32) -> Self {
        Self {
            length,
            frame_type,
            flags,
            stream_id,
        }
    }

    /// Writes the 9-byte big-endian prefix: 24-bit length, 8-bit type,
    /// 8-bit flags, 1-bit reserved (always 0) + 31-bit stream id.
    pub fn encode(&self, out: &mut [u8; 9]) {
        let len = self.length.to_be_bytes();
        out[0] = len[1];
        out[1] = len[2];
        out[2] = len[3];
        out[3] = self
            .frame_type
            .to_u8()
            .expect("FrameType is repr(u8)");
        out[4] = self.flags;
        out[5..9].copy_from_slice(&(self.stream_id & 0x7fff_ffff).to_be_bytes());
    }

    /// Parses a 9-byte prefix back into a `FrameHeader`. Only used by tests
    /// to verify the frame-boundary round-trip property (§8 invariant 1);
    /// the engine itself never needs to read back its own output.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameHeaderParseError> {
        if bytes.len() < 9 {
            return Err(FrameHeaderParseError::TooShort);
        }
        let length = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]);
        let frame_type = FrameType::from_u8(bytes[3])
            .ok_or(FrameHeaderParseError::UnknownFrameType(bytes[3]))?;
        let flags = bytes[4];
        let stream_id =
            u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & 0x7fff_ffff;
        Ok(Self {
            length,
            frame_type,
            flags,
            stream_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_headers_frame() {
        let header = FrameHeader::new(FrameType::Headers, 0x05, 3, 42);
        let mut buf = [0u8; 9];
        header.encode(&mut buf);
        assert_eq!(buf, [0x00, 0x00, 0x2a, 0x01, 0x05, 0x00, 0x00, 0x00, 0x03]);
        assert_eq!(FrameHeader::parse(&buf).unwrap(), header);
    }

    #[test]
    fn clears_reserved_bit_on_encode() {
        let header = FrameHeader::new(FrameType::GoAway, 0, 0x8000_0001, 0);
        let mut buf = [0u8; 9];
        header.encode(&mut buf);
        assert_eq!(&buf[5..9], &[0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn rejects_unknown_frame_type() {
        let buf = [0, 0, 0, 0xff, 0, 0, 0, 0, 0];
        assert_eq!(
            FrameHeader::parse(&buf),
            Err(FrameHeaderParseError::UnknownFrameType(0xff))
        );
    }
}
