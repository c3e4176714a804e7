//! Addressing and identity types.

use std::fmt;

use crate::error::{Error, Result};

/// Node address (unique within a network).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress(pub u32);

impl NodeAddress {
    /// Address meaning "any sink".
    pub const ANY_SINK: Self = Self(0);
    /// Broadcast address.
    pub const BROADCAST: Self = Self(0xffff_ffff);
}

impl From<u32> for NodeAddress {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<NodeAddress> for u32 {
    fn from(addr: NodeAddress) -> Self {
        addr.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network address.
///
/// Only the lower 24 bits are carried on the wire. Displays in decimal;
/// use `{:x}` or `{:#08x}` for the hexadecimal form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkAddress(u32);

impl NetworkAddress {
    /// Largest representable network address.
    pub const MAX: u32 = 0x00ff_ffff;

    /// Creates a network address, rejecting values wider than 24 bits.
    pub fn new(value: u32) -> Result<Self> {
        if value > Self::MAX {
            return Err(Error::invalid(format!(
                "network address 0x{value:x} exceeds 24 bits"
            )));
        }
        Ok(Self(value))
    }

    /// Builds an address from its 3-byte little-endian wire form.
    #[must_use]
    pub const fn from_le_bytes(bytes: [u8; 3]) -> Self {
        Self(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]))
    }

    /// Returns the 3-byte little-endian wire form.
    #[must_use]
    pub const fn to_le_bytes(self) -> [u8; 3] {
        let b = self.0.to_le_bytes();
        [b[0], b[1], b[2]]
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl From<NetworkAddress> for u32 {
    fn from(addr: NetworkAddress) -> Self {
        addr.0
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::LowerHex for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Network channel number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(pub u8);

impl From<u8> for Channel {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<Channel> for u8 {
    fn from(channel: Channel) -> Self {
        channel.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical data endpoint in `[0, 255]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint(pub u8);

impl Endpoint {
    /// Validates any integer as an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the value is outside `[0, 255]`.
    pub fn new<V>(value: V) -> Result<Self>
    where
        V: TryInto<u8> + Copy + fmt::Display,
    {
        value
            .try_into()
            .map(Self)
            .map_err(|_| Error::invalid(format!("endpoint {value} outside [0, 255]")))
    }
}

impl From<u8> for Endpoint {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Base operating role of a node (lower nibble of the role byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseRole {
    /// Sink: connects the mesh to the host.
    Sink,
    /// Router node, relays traffic of other nodes.
    Headnode,
    /// Leaf node, does not route other nodes' traffic.
    Subnode,
}

impl BaseRole {
    const fn from_nibble(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Sink),
            2 => Some(Self::Headnode),
            3 => Some(Self::Subnode),
            _ => None,
        }
    }

    const fn to_nibble(self) -> u8 {
        match self {
            Self::Sink => 1,
            Self::Headnode => 2,
            Self::Subnode => 3,
        }
    }
}

/// Node role: base role plus option flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Role {
    /// Base role.
    pub base: BaseRole,
    /// Low-latency mode.
    pub low_latency: bool,
    /// Relay-only flag (deprecated by newer stacks).
    pub relay: bool,
    /// Autorole: the node picks headnode/subnode itself.
    pub autorole: bool,
}

impl Role {
    const LOW_LATENCY: u8 = 0x10;
    const RELAY: u8 = 0x20;
    const AUTOROLE: u8 = 0x80;

    /// Creates a role with no options.
    #[must_use]
    pub const fn new(base: BaseRole) -> Self {
        Self {
            base,
            low_latency: false,
            relay: false,
            autorole: false,
        }
    }

    /// Sets the low-latency option.
    #[must_use]
    pub const fn low_latency(mut self, enabled: bool) -> Self {
        self.low_latency = enabled;
        self
    }

    /// Sets the autorole option.
    #[must_use]
    pub const fn autorole(mut self, enabled: bool) -> Self {
        self.autorole = enabled;
        self
    }

    /// Parses a role byte.
    ///
    /// Returns `None` if the base role is unknown.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match BaseRole::from_nibble(byte & 0x0f) {
            Some(base) => Some(Self {
                base,
                low_latency: byte & Self::LOW_LATENCY != 0,
                relay: byte & Self::RELAY != 0,
                autorole: byte & Self::AUTOROLE != 0,
            }),
            None => None,
        }
    }

    /// Encodes the role to its wire byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        let mut byte = self.base.to_nibble();
        if self.low_latency {
            byte |= Self::LOW_LATENCY;
        }
        if self.relay {
            byte |= Self::RELAY;
        }
        if self.autorole {
            byte |= Self::AUTOROLE;
        }
        byte
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self.base {
            BaseRole::Sink => "sink",
            BaseRole::Headnode => "headnode",
            BaseRole::Subnode => "subnode",
        };
        f.write_str(base)?;
        if self.low_latency {
            f.write_str("+ll")?;
        }
        if self.relay {
            f.write_str("+relay")?;
        }
        if self.autorole {
            f.write_str("+autorole")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_range() {
        assert_eq!(Endpoint::new(0).unwrap(), Endpoint(0));
        assert_eq!(Endpoint::new(255).unwrap(), Endpoint(255));
        assert!(matches!(
            Endpoint::new(256),
            Err(Error::InvalidParameter { .. })
        ));
        assert!(matches!(
            Endpoint::new(-1),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_network_address_display() {
        let addr = NetworkAddress::new(0x12_3456).unwrap();
        assert_eq!(addr.to_string(), "1193046");
        assert_eq!(format!("0x{addr:06x}"), "0x123456");
        assert_eq!(NetworkAddress::from_le_bytes(addr.to_le_bytes()), addr);
        assert!(NetworkAddress::new(0x0100_0000).is_err());
    }

    #[test]
    fn test_role_byte() {
        let role = Role::from_byte(0x82).unwrap();
        assert_eq!(role.base, BaseRole::Headnode);
        assert!(role.autorole);
        assert!(!role.low_latency);
        assert_eq!(role.to_byte(), 0x82);
        assert_eq!(role.to_string(), "headnode+autorole");

        assert_eq!(Role::new(BaseRole::Sink).low_latency(true).to_byte(), 0x11);
        assert_eq!(Role::from_byte(0x05), None);
    }
}
