//! # mesh-api
//!
//! An async Rust client for Wirepas Mesh coordinator nodes.
//!
//! The coordinator (usually a sink) is attached over a serial line. This
//! library opens a session with it, reads and writes its configuration,
//! sends application data and delivers the node's push events to
//! registered handlers.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Background reader with indication polling and per-endpoint handlers
//! - Last-known configuration snapshot without extra round trips
//! - Typed errors for every node result code
//!
//! ## Quick Start
//!
//! ```no_run
//! use mesh_api::Connection;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mesh_api::Error> {
//!     let conn = Connection::open_serial("/dev/ttyACM0", 115_200).await?;
//!
//!     let address = conn.get_node_address().await?;
//!     println!("Node address: {address}");
//!
//!     conn.register_for_data(1, |data| {
//!         println!("{} bytes from {}", data.payload.len(), data.source);
//!     })?;
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - SLIP framing, frames, requests and confirm decoding
//! - [`types`] - Addresses, roles, configuration and status values
//! - [`transport`] - Transport implementations (currently serial)
//! - [`event`] - Push events and the handler table
//! - [`store`] - Last-known configuration
//! - [`commands`] - Request/confirm correlation and result codes
//! - [`client`] - High-level [`Connection`]

pub mod client;
pub mod commands;
pub mod error;
pub mod event;
pub mod protocol;
pub mod store;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::{Connection, ConnectionConfig, ConnectionState};
pub use error::{Error, FrameError, Result};
pub use event::{Event, EventKind};
pub use transport::{SerialConfig, SerialTransport, Transport, TransportReader, serial::list_ports};
pub use types::{
    AccessCycleRange, Attribute, BaseRole, Channel, ChannelLimits, ConfigSnapshot, DataMessage, DataSent,
    DiagnosticConfig, Endpoint, FirmwareVersion, NeighborInfo, NetworkAddress, NodeAddress, Qos,
    ReceivedData, RemoteStatus, Role, ScanNeighborsDone, ScratchpadStatus, StackStatus,
};
