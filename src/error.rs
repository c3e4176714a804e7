//! Error types for the mesh API.
//!
//! Every fallible operation in this crate reports one of the [`Error`]
//! kinds. Transport and codec faults are translated into these kinds at the
//! boundary where they occur.

use std::io;

use thiserror::Error;

use crate::types::Attribute;

/// The main error type for mesh API operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The connection is not open (never opened, closing or closed).
    #[error("not connected")]
    NotConnected,

    /// The node has no value for the requested attribute.
    #[error("attribute not set: {attribute}")]
    AttributeUnset { attribute: Attribute },

    /// A parameter was rejected, either locally or by the node.
    #[error("invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    /// The underlying transport failed.
    #[error("transport failure: {0}")]
    TransportFailure(#[from] io::Error),

    /// Malformed or unexpected response, or a request refused by the node.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// No response arrived within the request deadline.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl Error {
    /// Creates a protocol error from any displayable message.
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an invalid-parameter error.
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            reason: reason.into(),
        }
    }

    /// Creates a timeout error for the given deadline.
    pub(crate) fn timeout(deadline: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns true if this error means the transport is gone and the
    /// connection cannot continue.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::NotConnected => true,
            Self::TransportFailure(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

impl From<tokio_serial::Error> for Error {
    fn from(e: tokio_serial::Error) -> Self {
        Self::TransportFailure(io::Error::from(e))
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Self::protocol(e.to_string())
    }
}

/// Codec-level framing errors.
///
/// These never leave the crate untranslated: the reader task logs and drops
/// the offending frame, and request paths convert them into
/// [`Error::Protocol`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Frame too short to contain the header and CRC.
    #[error("frame too short: need at least {min} bytes, got {got}")]
    TooShort { min: usize, got: usize },

    /// Decoded frame exceeds the maximum size.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    /// Header length does not match the received payload.
    #[error("length mismatch: header says {declared} bytes, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// CRC check failed.
    #[error("bad crc: computed 0x{computed:04x}, received 0x{received:04x}")]
    BadCrc { computed: u16, received: u16 },

    /// Invalid SLIP escape sequence.
    #[error("invalid escape byte 0x{0:02x}")]
    BadEscape(u8),

    /// Primitive id not known to this client.
    #[error("unknown primitive 0x{0:02x}")]
    UnknownPrimitive(u8),

    /// Payload truncated for its primitive.
    #[error("truncated {what}: need {need} bytes, got {got}")]
    Truncated {
        what: &'static str,
        need: usize,
        got: usize,
    },
}

/// Result type alias for mesh API operations.
pub type Result<T> = std::result::Result<T, Error>;
