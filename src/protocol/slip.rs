//! SLIP framing for the coordinator serial protocol.
//!
//! Each frame is protected by a CRC-16/CCITT and delimited by SLIP `END`
//! bytes:
//! ```text
//! ┌──────┬───────────────────────────────┬────────────┬──────┐
//! │ 0xC0 │ frame bytes (escaped)         │ crc16 (LE) │ 0xC0 │
//! └──────┴───────────────────────────────┴────────────┴──────┘
//! ```
//! `0xC0` inside the frame is sent as `0xDB 0xDC`, `0xDB` as `0xDB 0xDD`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// SLIP frame delimiter.
pub const END: u8 = 0xC0;
/// SLIP escape byte.
pub const ESC: u8 = 0xDB;
const ESC_END: u8 = 0xDC;
const ESC_ESC: u8 = 0xDD;

/// Maximum unescaped frame size (header + payload + CRC).
pub const MAX_FRAME_SIZE: usize = 3 + 255 + 2;

/// Minimum unescaped frame size (header + CRC).
pub const MIN_FRAME_SIZE: usize = 3 + 2;

const CRC_SIZE: usize = 2;

/// Computes CRC-16/CCITT (poly 0x1021, init 0xFFFF).
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xffff;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Encodes a frame: appends the CRC, escapes and delimits it.
#[must_use]
pub fn encode(frame: &[u8]) -> Bytes {
    let crc = crc16(frame);
    let mut buf = BytesMut::with_capacity(2 * (frame.len() + CRC_SIZE) + 2);
    buf.put_u8(END);
    for &byte in frame.iter().chain(crc.to_le_bytes().iter()) {
        match byte {
            END => buf.put_slice(&[ESC, ESC_END]),
            ESC => buf.put_slice(&[ESC, ESC_ESC]),
            other => buf.put_u8(other),
        }
    }
    buf.put_u8(END);
    buf.freeze()
}

/// Stream decoder that handles partial data.
#[derive(Debug, Default)]
pub struct SlipDecoder {
    buffer: BytesMut,
}

impl SlipDecoder {
    /// Creates a new decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Feeds raw transport bytes into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete frame.
    ///
    /// Returns `Ok(Some(frame))` with the CRC stripped, `Ok(None)` if more
    /// data is needed. An error consumes the offending frame, so the caller
    /// can keep decoding.
    pub fn decode(&mut self) -> Result<Option<Bytes>, FrameError> {
        // Skip delimiters between frames
        let start = self.buffer.iter().position(|&b| b != END);
        match start {
            Some(n) => self.buffer.advance(n),
            None => {
                self.buffer.clear();
                return Ok(None);
            }
        }

        let Some(end) = self.buffer.iter().position(|&b| b == END) else {
            if self.buffer.len() > 2 * MAX_FRAME_SIZE {
                let size = self.buffer.len();
                self.buffer.clear();
                return Err(FrameError::TooLarge {
                    size,
                    max: MAX_FRAME_SIZE,
                });
            }
            return Ok(None);
        };

        let escaped = self.buffer.split_to(end);
        unescape_and_check(&escaped).map(Some)
    }
}

fn unescape_and_check(escaped: &[u8]) -> Result<Bytes, FrameError> {
    let mut frame = BytesMut::with_capacity(escaped.len());
    let mut bytes = escaped.iter();
    while let Some(&byte) = bytes.next() {
        if byte == ESC {
            match bytes.next() {
                Some(&ESC_END) => frame.put_u8(END),
                Some(&ESC_ESC) => frame.put_u8(ESC),
                Some(&other) => return Err(FrameError::BadEscape(other)),
                None => return Err(FrameError::BadEscape(ESC)),
            }
        } else {
            frame.put_u8(byte);
        }
    }

    if frame.len() < MIN_FRAME_SIZE {
        return Err(FrameError::TooShort {
            min: MIN_FRAME_SIZE,
            got: frame.len(),
        });
    }
    if frame.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let body_len = frame.len() - CRC_SIZE;
    let received = u16::from_le_bytes([frame[body_len], frame[body_len + 1]]);
    let computed = crc16(&frame[..body_len]);
    if received != computed {
        return Err(FrameError::BadCrc { computed, received });
    }

    frame.truncate(body_len);
    Ok(frame.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_ccitt_false() {
        // Standard check value for CRC-16/CCITT-FALSE
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_encode_escapes_special_bytes() {
        let frame = [0x0e, END, 0x01, ESC];
        let encoded = encode(&frame);

        assert_eq!(encoded[0], END);
        assert_eq!(&encoded[1..6], &[0x0e, ESC, ESC_END, 0x01, ESC]);
        assert_eq!(encoded[6], ESC_ESC);
        assert_eq!(*encoded.last().unwrap(), END);
        // Only the two delimiters may be raw END bytes
        assert_eq!(encoded.iter().filter(|&&b| b == END).count(), 2);
    }

    #[test]
    fn test_decode_partial_frame() {
        let encoded = encode(&[0x8e, 0x01, 0x00]);
        let mut decoder = SlipDecoder::new();

        decoder.feed(&encoded[..3]);
        assert_eq!(decoder.decode().unwrap(), None);

        decoder.feed(&encoded[3..]);
        assert_eq!(
            decoder.decode().unwrap(),
            Some(Bytes::from_static(&[0x8e, 0x01, 0x00]))
        );
        assert_eq!(decoder.decode().unwrap(), None);
    }

    #[test]
    fn test_decode_multiple_frames_with_escapes() {
        let first = [0x03, 0x07, 0x01, END];
        let second = [0x8c, 0x08, 0x02, ESC, 0x10];
        let mut decoder = SlipDecoder::new();
        decoder.feed(&encode(&first));
        decoder.feed(&encode(&second));

        assert_eq!(decoder.decode().unwrap().as_deref(), Some(&first[..]));
        assert_eq!(decoder.decode().unwrap().as_deref(), Some(&second[..]));
        assert_eq!(decoder.decode().unwrap(), None);
    }

    #[test]
    fn test_bad_crc_is_isolated() {
        let mut corrupted = encode(&[0x8e, 0x01, 0x00]).to_vec();
        corrupted[2] ^= 0xff;
        let good = encode(&[0x8e, 0x02, 0x00]);

        let mut decoder = SlipDecoder::new();
        decoder.feed(&corrupted);
        decoder.feed(&good);

        assert!(matches!(decoder.decode(), Err(FrameError::BadCrc { .. })));
        assert_eq!(
            decoder.decode().unwrap(),
            Some(Bytes::from_static(&[0x8e, 0x02, 0x00]))
        );
    }

    #[test]
    fn test_short_frame_rejected() {
        let mut decoder = SlipDecoder::new();
        decoder.feed(&[END, 0x01, 0x02, END]);
        assert!(matches!(
            decoder.decode(),
            Err(FrameError::TooShort { .. })
        ));
    }
}
