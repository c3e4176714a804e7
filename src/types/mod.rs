//! Data types for the coordinator node model.
//!
//! This module contains the value types used throughout the library:
//! - Addresses, channels, endpoints and roles
//! - Configuration snapshot and diagnostic configuration
//! - Stack, scratchpad and neighbor status
//! - Application data

pub mod address;
pub mod config;
pub mod message;
pub mod status;

pub use address::{BaseRole, Channel, Endpoint, NetworkAddress, NodeAddress, Role};
pub use config::{Attribute, ConfigSnapshot, DiagnosticConfig};
pub use message::{DataMessage, DataSent, Qos, ReceivedData};
pub use status::{
    AccessCycleRange, ChannelLimits, FirmwareVersion, NeighborInfo, RemoteStatus, ScanNeighborsDone,
    ScratchpadStatus, StackStatus,
};
