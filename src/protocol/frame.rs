//! Protocol frame layout.
//!
//! Every message exchanged with the node shares the same header:
//! ```text
//! ┌──────────────┬──────────┬────────────────┬──────────────────┐
//! │ primitive_id │ frame_id │ payload_length │ payload          │
//! │ 1 byte       │ 1 byte   │ 1 byte         │ length bytes     │
//! └──────────────┴──────────┴────────────────┴──────────────────┘
//! ```
//! The frame id is the correlation token between a request and its confirm.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::protocol::slip;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 3;

/// Maximum payload length.
pub const MAX_PAYLOAD: usize = 255;

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Primitive id.
    pub primitive_id: u8,
    /// Frame id (correlation token).
    pub frame_id: u8,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame.
    #[must_use]
    pub fn new(primitive_id: u8, frame_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            primitive_id,
            frame_id,
            payload: payload.into(),
        }
    }

    /// Parses an unescaped frame (CRC already stripped).
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                min: HEADER_SIZE,
                got: data.len(),
            });
        }
        let declared = usize::from(data[2]);
        let actual = data.len() - HEADER_SIZE;
        if declared != actual {
            return Err(FrameError::LengthMismatch { declared, actual });
        }
        Ok(Self {
            primitive_id: data[0],
            frame_id: data[1],
            payload: Bytes::copy_from_slice(&data[HEADER_SIZE..]),
        })
    }

    /// Serializes the frame without SLIP encoding.
    ///
    /// # Panics
    ///
    /// Panics if the payload exceeds [`MAX_PAYLOAD`]; request builders
    /// validate lengths before constructing frames.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        assert!(
            self.payload.len() <= MAX_PAYLOAD,
            "payload exceeds maximum frame size"
        );
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u8(self.primitive_id);
        buf.put_u8(self.frame_id);
        buf.put_u8(self.payload.len() as u8);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Serializes and SLIP-encodes the frame for the wire.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        slip::encode(&self.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let frame = Frame::new(0x0E, 7, vec![0x02, 0x00]);
        let bytes = frame.to_bytes();
        assert_eq!(&bytes[..], &[0x0E, 7, 2, 0x02, 0x00]);
        assert_eq!(Frame::parse(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_length_mismatch() {
        assert_eq!(
            Frame::parse(&[0x8E, 1, 4, 0x00]),
            Err(FrameError::LengthMismatch {
                declared: 4,
                actual: 1
            })
        );
    }
}
