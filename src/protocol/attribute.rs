//! Attribute identifiers and node result codes.

use crate::types::Attribute;

/// Configuration service (CSAP) attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CsapAttribute {
    NodeAddress = 1,
    NetworkAddress = 2,
    NetworkChannel = 3,
    NodeRole = 4,
    Mtu = 5,
    PduBufferSize = 6,
    ScratchpadSequence = 7,
    MeshApiVersion = 8,
    FirmwareMajor = 9,
    FirmwareMinor = 10,
    FirmwareMaintenance = 11,
    FirmwareDevelopment = 12,
    CipherKey = 13,
    AuthenticationKey = 14,
    ChannelLimits = 15,
    AppConfigDataSize = 16,
    HwMagic = 17,
    StackProfile = 18,
    ChannelMap = 21,
}

impl CsapAttribute {
    /// Parses an attribute id.
    #[must_use]
    pub const fn from_id(id: u16) -> Option<Self> {
        match id {
            1 => Some(Self::NodeAddress),
            2 => Some(Self::NetworkAddress),
            3 => Some(Self::NetworkChannel),
            4 => Some(Self::NodeRole),
            5 => Some(Self::Mtu),
            6 => Some(Self::PduBufferSize),
            7 => Some(Self::ScratchpadSequence),
            8 => Some(Self::MeshApiVersion),
            9 => Some(Self::FirmwareMajor),
            10 => Some(Self::FirmwareMinor),
            11 => Some(Self::FirmwareMaintenance),
            12 => Some(Self::FirmwareDevelopment),
            13 => Some(Self::CipherKey),
            14 => Some(Self::AuthenticationKey),
            15 => Some(Self::ChannelLimits),
            16 => Some(Self::AppConfigDataSize),
            17 => Some(Self::HwMagic),
            18 => Some(Self::StackProfile),
            21 => Some(Self::ChannelMap),
            _ => None,
        }
    }

    /// Wire length of the attribute value in bytes.
    #[must_use]
    pub const fn value_len(self) -> usize {
        match self {
            Self::NodeAddress | Self::ChannelMap => 4,
            Self::NetworkAddress => 3,
            Self::NetworkChannel
            | Self::NodeRole
            | Self::Mtu
            | Self::PduBufferSize
            | Self::ScratchpadSequence
            | Self::AppConfigDataSize => 1,
            Self::MeshApiVersion
            | Self::FirmwareMajor
            | Self::FirmwareMinor
            | Self::FirmwareMaintenance
            | Self::FirmwareDevelopment
            | Self::ChannelLimits
            | Self::HwMagic
            | Self::StackProfile => 2,
            Self::CipherKey | Self::AuthenticationKey => 16,
        }
    }

    /// Returns the public attribute name used in errors.
    #[must_use]
    pub const fn attribute(self) -> Attribute {
        match self {
            Self::NodeAddress => Attribute::NodeAddress,
            Self::NetworkAddress => Attribute::NetworkAddress,
            Self::NetworkChannel => Attribute::NetworkChannel,
            Self::NodeRole => Attribute::Role,
            Self::Mtu => Attribute::Mtu,
            Self::PduBufferSize => Attribute::PduBufferSize,
            Self::ScratchpadSequence => Attribute::ScratchpadSequence,
            Self::MeshApiVersion => Attribute::MeshApiVersion,
            Self::FirmwareMajor
            | Self::FirmwareMinor
            | Self::FirmwareMaintenance
            | Self::FirmwareDevelopment => Attribute::FirmwareVersion,
            Self::CipherKey => Attribute::CipherKey,
            Self::AuthenticationKey => Attribute::AuthenticationKey,
            Self::ChannelLimits => Attribute::ChannelLimits,
            Self::AppConfigDataSize => Attribute::AppConfigDataSize,
            Self::HwMagic => Attribute::HwMagic,
            Self::StackProfile => Attribute::StackProfile,
            Self::ChannelMap => Attribute::ChannelMap,
        }
    }
}

/// Management service (MSAP) attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MsapAttribute {
    StackStatus = 1,
    PduBufferUsage = 2,
    PduBufferCapacity = 3,
    RemainingEnergy = 5,
    Autostart = 6,
    RouteCount = 7,
    SystemTime = 8,
    AccessCycleRange = 9,
    AccessCycleLimits = 10,
    CurrentAccessCycle = 11,
    ScratchpadBlockMax = 12,
}

impl MsapAttribute {
    /// Wire length of the attribute value in bytes.
    #[must_use]
    pub const fn value_len(self) -> usize {
        match self {
            Self::SystemTime | Self::AccessCycleRange | Self::AccessCycleLimits => 4,
            Self::CurrentAccessCycle => 2,
            Self::StackStatus
            | Self::PduBufferUsage
            | Self::PduBufferCapacity
            | Self::RemainingEnergy
            | Self::Autostart
            | Self::RouteCount
            | Self::ScratchpadBlockMax => 1,
        }
    }

    /// Returns the public attribute name used in errors.
    #[must_use]
    pub const fn attribute(self) -> Attribute {
        match self {
            Self::StackStatus => Attribute::StackStatus,
            Self::PduBufferUsage => Attribute::PduBufferUsage,
            Self::PduBufferCapacity => Attribute::PduBufferCapacity,
            Self::RemainingEnergy => Attribute::RemainingEnergy,
            Self::Autostart => Attribute::Autostart,
            Self::RouteCount => Attribute::RouteCount,
            Self::SystemTime => Attribute::SystemTime,
            Self::AccessCycleRange => Attribute::AccessCycleRange,
            Self::AccessCycleLimits => Attribute::AccessCycleLimits,
            Self::CurrentAccessCycle => Attribute::CurrentAccessCycle,
            Self::ScratchpadBlockMax => Attribute::ScratchpadBlockMax,
        }
    }
}

/// Result codes of attribute reads.
pub mod read_result {
    pub const OK: u8 = 0;
    pub const STACK_NOT_STOPPED: u8 = 2;
    pub const NOT_SET: u8 = 4;
    /// The attribute exists but cannot be read back (write-only keys).
    pub const ACCESS_DENIED: u8 = 5;
    pub const ACCESS_DENIED_LOCKED: u8 = 6;
}

/// Result codes of attribute writes.
pub mod write_result {
    pub const OK: u8 = 0;
    pub const STACK_NOT_STOPPED: u8 = 2;
    pub const INVALID_VALUE: u8 = 4;
    pub const ACCESS_DENIED: u8 = 6;
}

/// Result codes of app config reads and writes.
pub mod app_config_result {
    pub const OK: u8 = 0;
    /// Read: no configuration received yet.
    pub const NO_CONFIG: u8 = 1;
    /// Write: node is not a sink.
    pub const NOT_A_SINK: u8 = 1;
    pub const INVALID_INTERVAL: u8 = 2;
    pub const INVALID_SEQUENCE: u8 = 3;
}

/// Key written to remove an authentication or cipher key.
pub const DISABLED_KEY: [u8; 16] = [0xff; 16];

/// Factory reset confirmation key ("DoIt", little-endian).
pub const FACTORY_RESET_KEY: [u8; 4] = *b"DoIt";
