//! Primitive identifiers of the coordinator protocol.
//!
//! Requests are sent by the host; the node answers each request with a
//! confirm whose id is the request id plus [`CONFIRM_OFFSET`]. Indications
//! are sent by the node and acknowledged by the host with a response whose
//! id is the indication id plus [`RESPONSE_OFFSET`].

/// Offset from a request id to its confirm id.
pub const CONFIRM_OFFSET: u8 = 0x80;

/// Offset from an indication id to its response id.
pub const RESPONSE_OFFSET: u8 = 0x80;

/// Request primitives sent to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Primitive {
    /// Transmit application data.
    DataTx = 0x01,
    /// Ask the node for pending indications.
    IndicationPoll = 0x04,
    /// Start the mesh stack.
    StackStart = 0x05,
    /// Stop the mesh stack.
    StackStop = 0x06,
    /// Write a management attribute.
    MsapAttributeWrite = 0x0B,
    /// Read a management attribute.
    MsapAttributeRead = 0x0C,
    /// Write a configuration attribute.
    CsapAttributeWrite = 0x0D,
    /// Read a configuration attribute.
    CsapAttributeRead = 0x0E,
    /// Factory reset.
    FactoryReset = 0x16,
    /// Request the scratchpad status of a remote node.
    RemoteStatus = 0x19,
    /// Transmit application data with an initial buffering delay.
    DataTxTt = 0x1F,
    /// Read the neighbor list.
    GetNeighbors = 0x20,
    /// Start a neighbor scan.
    ScanNeighbors = 0x21,
    /// Write the sink cost.
    SinkCostWrite = 0x38,
    /// Read the sink cost.
    SinkCostRead = 0x39,
    /// Write app config data.
    AppConfigWrite = 0x3A,
    /// Read app config data.
    AppConfigRead = 0x3B,
}

impl Primitive {
    /// Parses a request primitive id.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::DataTx),
            0x04 => Some(Self::IndicationPoll),
            0x05 => Some(Self::StackStart),
            0x06 => Some(Self::StackStop),
            0x0B => Some(Self::MsapAttributeWrite),
            0x0C => Some(Self::MsapAttributeRead),
            0x0D => Some(Self::CsapAttributeWrite),
            0x0E => Some(Self::CsapAttributeRead),
            0x16 => Some(Self::FactoryReset),
            0x19 => Some(Self::RemoteStatus),
            0x1F => Some(Self::DataTxTt),
            0x20 => Some(Self::GetNeighbors),
            0x21 => Some(Self::ScanNeighbors),
            0x38 => Some(Self::SinkCostWrite),
            0x39 => Some(Self::SinkCostRead),
            0x3A => Some(Self::AppConfigWrite),
            0x3B => Some(Self::AppConfigRead),
            _ => None,
        }
    }

    /// Returns the id of the confirm answering this request.
    #[must_use]
    pub const fn confirm_id(self) -> u8 {
        self as u8 + CONFIRM_OFFSET
    }

    /// Maps a confirm id back to its request primitive.
    #[must_use]
    pub const fn from_confirm_id(byte: u8) -> Option<Self> {
        if byte < CONFIRM_OFFSET {
            return None;
        }
        Self::from_byte(byte - CONFIRM_OFFSET)
    }
}

impl From<Primitive> for u8 {
    fn from(p: Primitive) -> Self {
        p as Self
    }
}

/// Indication primitives sent by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IndicationId {
    /// Transmission report for a sent packet.
    DataTx = 0x02,
    /// Application data received.
    DataRx = 0x03,
    /// Stack state changed.
    StackState = 0x07,
    /// Remote scratchpad status received.
    RemoteStatus = 0x1A,
    /// Neighbor scan finished.
    ScanNeighbors = 0x22,
    /// App config data received from the network.
    AppConfigRx = 0x3F,
}

impl IndicationId {
    /// Parses an indication id.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x02 => Some(Self::DataTx),
            0x03 => Some(Self::DataRx),
            0x07 => Some(Self::StackState),
            0x1A => Some(Self::RemoteStatus),
            0x22 => Some(Self::ScanNeighbors),
            0x3F => Some(Self::AppConfigRx),
            _ => None,
        }
    }

    /// Returns the id of the response acknowledging this indication.
    #[must_use]
    pub const fn response_id(self) -> u8 {
        self as u8 + RESPONSE_OFFSET
    }
}

impl From<IndicationId> for u8 {
    fn from(id: IndicationId) -> Self {
        id as Self
    }
}

/// Returns true if a primitive id received from the node is a confirm.
#[must_use]
pub const fn is_confirm(byte: u8) -> bool {
    byte >= CONFIRM_OFFSET
}
