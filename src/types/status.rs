//! Node status types.

use std::fmt;

use crate::types::address::NodeAddress;

/// Coordinator stack status flags.
///
/// A value of zero means the stack is running with a complete configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StackStatus(pub u8);

impl StackStatus {
    const STOPPED: u8 = 0x01;
    const NETWORK_ADDRESS_NOT_SET: u8 = 0x02;
    const NODE_ADDRESS_NOT_SET: u8 = 0x04;
    const NETWORK_CHANNEL_NOT_SET: u8 = 0x08;
    const ROLE_NOT_SET: u8 = 0x10;

    /// Returns the raw status byte.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if the stack is stopped.
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        self.0 & Self::STOPPED != 0
    }

    /// Returns true if the network address is missing.
    #[must_use]
    pub const fn network_address_missing(self) -> bool {
        self.0 & Self::NETWORK_ADDRESS_NOT_SET != 0
    }

    /// Returns true if the node address is missing.
    #[must_use]
    pub const fn node_address_missing(self) -> bool {
        self.0 & Self::NODE_ADDRESS_NOT_SET != 0
    }

    /// Returns true if the network channel is missing.
    #[must_use]
    pub const fn network_channel_missing(self) -> bool {
        self.0 & Self::NETWORK_CHANNEL_NOT_SET != 0
    }

    /// Returns true if the role is missing.
    #[must_use]
    pub const fn role_missing(self) -> bool {
        self.0 & Self::ROLE_NOT_SET != 0
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("running");
        }
        let flags = [
            (self.is_stopped(), "stopped"),
            (self.network_address_missing(), "no network address"),
            (self.node_address_missing(), "no node address"),
            (self.network_channel_missing(), "no network channel"),
            (self.role_missing(), "no role"),
        ];
        let mut first = true;
        for (set, name) in flags {
            if set {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            write!(f, "0x{:02x}", self.0)?;
        }
        Ok(())
    }
}

/// Firmware version as `major.minor.maintenance.development`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareVersion {
    pub major: u16,
    pub minor: u16,
    pub maintenance: u16,
    pub development: u16,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.maintenance, self.development
        )
    }
}

/// Range of channels usable by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLimits {
    pub first: u8,
    pub last: u8,
}

/// Access cycle bounds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessCycleRange {
    pub min_ms: u16,
    pub max_ms: u16,
}

impl AccessCycleRange {
    pub(crate) const fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self {
            min_ms: u16::from_le_bytes([bytes[0], bytes[1]]),
            max_ms: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }

    pub(crate) fn to_le_bytes(self) -> [u8; 4] {
        let [a, b] = self.min_ms.to_le_bytes();
        let [c, d] = self.max_ms.to_le_bytes();
        [a, b, c, d]
    }
}

/// Scratchpad (OTAP image) status of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScratchpadStatus {
    /// Stored scratchpad length in bytes.
    pub length: u32,
    /// Stored scratchpad CRC.
    pub crc: u16,
    /// Stored scratchpad sequence number.
    pub sequence: u8,
    /// Stored scratchpad type.
    pub kind: u8,
    /// Stored scratchpad status.
    pub status: u8,
    /// Processed scratchpad length in bytes.
    pub processed_length: u32,
    /// Processed scratchpad CRC.
    pub processed_crc: u16,
    /// Processed scratchpad sequence number.
    pub processed_sequence: u8,
    /// Firmware memory area id.
    pub firmware_area_id: u32,
    /// Version of the running firmware.
    pub firmware: [u8; 4],
}

/// Remote status report pushed after a remote status request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStatus {
    /// Node that sent the report.
    pub source: NodeAddress,
    /// Scratchpad status of that node.
    pub status: ScratchpadStatus,
    /// Seconds until a pending update is processed (0 = none pending).
    pub update_timeout_s: u16,
}

/// Neighbor-scan completion notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanNeighborsDone {
    /// True when the scan finished and neighbors can be read.
    pub ready: bool,
}

/// One entry of the neighbor list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborInfo {
    pub address: NodeAddress,
    pub link_reliability: u8,
    pub normalized_rssi: u8,
    pub cost: u8,
    pub channel: u8,
    pub neighbor_type: u8,
    pub tx_power: u8,
    pub rx_power: u8,
    /// Seconds since the last update of this entry.
    pub last_update_s: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_status_flags() {
        let status = StackStatus(0x03);
        assert!(status.is_stopped());
        assert!(status.network_address_missing());
        assert!(!status.role_missing());
        assert_eq!(status.to_string(), "stopped, no network address");
        assert_eq!(StackStatus(0).to_string(), "running");
    }

    #[test]
    fn test_firmware_display() {
        let v = FirmwareVersion {
            major: 5,
            minor: 1,
            maintenance: 0,
            development: 27,
        };
        assert_eq!(v.to_string(), "5.1.0.27");
    }
}
