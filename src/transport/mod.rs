//! Transport layer for coordinator communication.
//!
//! A transport moves raw bytes. SLIP framing and frame decoding happen in
//! [`protocol`](crate::protocol), so a transport only needs to open the
//! link, write byte buffers, and hand out a reader for the background task.

#[cfg(test)]
pub(crate) mod mock;
pub mod serial;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::error::Result;

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Opens the link.
    fn connect(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Closes the link. Closing a closed link is a no-op.
    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Writes encoded bytes to the node.
    fn send(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;

    /// Takes the read side of the link for the background reader.
    ///
    /// Returns `None` before [`connect`](Self::connect) or once taken.
    fn take_reader(&mut self) -> Option<Box<dyn TransportReader>>;
}

/// Read side of a transport.
pub trait TransportReader: Send {
    /// Waits for the next chunk of bytes.
    ///
    /// Chunks carry no framing. An error means the link is gone.
    fn recv(&mut self) -> BoxFuture<'_, Result<Bytes>>;
}

pub use serial::{SerialConfig, SerialTransport};
