//! Configuration snapshot types.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::types::address::{Channel, NetworkAddress, NodeAddress, Role};
use crate::types::status::StackStatus;

/// Configuration attributes tracked by the client.
///
/// Used to name the attribute in [`Error::AttributeUnset`](crate::Error::AttributeUnset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    NodeAddress,
    NetworkAddress,
    NetworkChannel,
    Role,
    AuthenticationKey,
    CipherKey,
    AppConfigData,
    StackStatus,
    Mtu,
    FirmwareVersion,
    MeshApiVersion,
    ChannelLimits,
    AppConfigDataSize,
    ChannelMap,
    SinkCost,
    PduBufferSize,
    ScratchpadSequence,
    HwMagic,
    StackProfile,
    PduBufferUsage,
    PduBufferCapacity,
    RemainingEnergy,
    RouteCount,
    SystemTime,
    Autostart,
    AccessCycleRange,
    AccessCycleLimits,
    CurrentAccessCycle,
    ScratchpadBlockMax,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NodeAddress => "node address",
            Self::NetworkAddress => "network address",
            Self::NetworkChannel => "network channel",
            Self::Role => "role",
            Self::AuthenticationKey => "authentication key",
            Self::CipherKey => "cipher key",
            Self::AppConfigData => "app config data",
            Self::StackStatus => "stack status",
            Self::Mtu => "mtu",
            Self::FirmwareVersion => "firmware version",
            Self::MeshApiVersion => "mesh API version",
            Self::ChannelLimits => "channel limits",
            Self::AppConfigDataSize => "app config data size",
            Self::ChannelMap => "channel map",
            Self::SinkCost => "sink cost",
            Self::PduBufferSize => "PDU buffer size",
            Self::ScratchpadSequence => "scratchpad sequence",
            Self::HwMagic => "hardware magic",
            Self::StackProfile => "stack profile",
            Self::PduBufferUsage => "PDU buffer usage",
            Self::PduBufferCapacity => "PDU buffer capacity",
            Self::RemainingEnergy => "remaining energy",
            Self::RouteCount => "route count",
            Self::SystemTime => "system time",
            Self::Autostart => "autostart",
            Self::AccessCycleRange => "access cycle range",
            Self::AccessCycleLimits => "access cycle limits",
            Self::CurrentAccessCycle => "current access cycle",
            Self::ScratchpadBlockMax => "scratchpad block max",
        };
        f.write_str(name)
    }
}

/// Diagnostic interval and application configuration payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticConfig {
    /// Sequence number of the configuration.
    pub sequence: u8,
    /// Diagnostic data interval in seconds.
    pub interval_s: u16,
    /// Opaque application configuration payload.
    pub data: Bytes,
}

impl DiagnosticConfig {
    /// Returns the diagnostic interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_s))
    }
}

/// Last-known node configuration.
///
/// Every field is `None` until the node has confirmed a value for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub node_address: Option<NodeAddress>,
    pub network_address: Option<NetworkAddress>,
    pub network_channel: Option<Channel>,
    pub role: Option<Role>,
    pub authentication_key_set: Option<bool>,
    pub cipher_key_set: Option<bool>,
    pub app_config: Option<DiagnosticConfig>,
    pub stack_status: Option<StackStatus>,
}
