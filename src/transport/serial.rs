//! Serial transport implementation.
//!
//! The coordinator is attached over a UART (usually a USB serial adapter)
//! running 8N1 at a fixed bitrate.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportReader};

/// Default bitrate of coordinator nodes.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Size of a single read from the port.
const READ_CHUNK: usize = 1024;

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyACM0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }
}

/// Serial transport.
///
/// The stream is split so the background reader owns the read half while
/// requests write through the shared write half.
pub struct SerialTransport {
    config: SerialConfig,
    writer: Option<Arc<Mutex<WriteHalf<SerialStream>>>>,
    reader: Option<ReadHalf<SerialStream>>,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self {
            config,
            writer: None,
            reader: None,
        }
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            if self.writer.is_some() {
                return Ok(());
            }

            tracing::info!(
                port = %self.config.port,
                baud_rate = self.config.baud_rate,
                "opening serial port"
            );

            let stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
                .open_native_async()?;

            // Bytes queued before we opened belong to no request
            if let Err(e) = stream.clear(ClearBuffer::All) {
                tracing::warn!("failed to flush serial buffers: {}", e);
            }

            let (reader, writer) = tokio::io::split(stream);
            self.reader = Some(reader);
            self.writer = Some(Arc::new(Mutex::new(writer)));

            tracing::info!("serial port open");
            Ok(())
        }
        .boxed()
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            if self.writer.is_some() || self.reader.is_some() {
                tracing::info!(port = %self.config.port, "closing serial port");
                self.writer = None;
                self.reader = None;
            }
            Ok(())
        }
        .boxed()
    }

    fn send(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>> {
        let writer = self.writer.clone();
        async move {
            let writer = writer.ok_or(Error::NotConnected)?;
            let mut writer = writer.lock().await;

            tracing::trace!("writing {} bytes", data.len());
            writer.write_all(&data).await?;
            writer.flush().await?;
            Ok(())
        }
        .boxed()
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    fn take_reader(&mut self) -> Option<Box<dyn TransportReader>> {
        self.reader
            .take()
            .map(|reader| Box::new(SerialReader { reader }) as Box<dyn TransportReader>)
    }
}

/// Read half of a serial port.
struct SerialReader {
    reader: ReadHalf<SerialStream>,
}

impl TransportReader for SerialReader {
    fn recv(&mut self) -> BoxFuture<'_, Result<Bytes>> {
        async move {
            let mut buf = vec![0u8; READ_CHUNK];
            let n = self.reader.read(&mut buf).await?;
            if n == 0 {
                tracing::debug!("serial port closed");
                return Err(Error::TransportFailure(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "serial port closed",
                )));
            }
            buf.truncate(n);
            tracing::trace!("received {} bytes", n);
            Ok(Bytes::from(buf))
        }
        .boxed()
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyACM0");
        assert_eq!(config.port, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyACM0").baud_rate(1_000_000);
        assert_eq!(config.baud_rate, 1_000_000);
    }

    #[tokio::test]
    async fn test_send_requires_connect() {
        let mut transport = SerialTransport::new(SerialConfig::new("/dev/does-not-exist"));
        assert!(!transport.is_connected());
        assert!(transport.take_reader().is_none());
        assert!(matches!(
            transport.send(Bytes::from_static(&[0xc0])).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let mut transport = SerialTransport::new(SerialConfig::new("/dev/does-not-exist"));
        assert!(matches!(
            transport.connect().await,
            Err(Error::TransportFailure(_))
        ));
    }

    #[test]
    #[ignore = "Requires /sys/class/tty - not available in sandboxed builds"]
    fn test_list_ports() {
        let _ = list_ports();
    }
}
