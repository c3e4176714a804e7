//! Application data types.

use bytes::Bytes;

use crate::types::address::{Endpoint, NodeAddress};

/// Quality of service class of a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Qos {
    #[default]
    Normal,
    High,
}

/// Application data received from the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedData {
    /// Application payload.
    pub payload: Bytes,
    pub source: NodeAddress,
    pub destination: NodeAddress,
    pub source_endpoint: Endpoint,
    pub destination_endpoint: Endpoint,
    pub qos: Qos,
    /// Time spent in the mesh, in milliseconds.
    pub travel_time_ms: u32,
    pub hop_count: u8,
    /// Host reception time, milliseconds since the Unix epoch.
    pub received_at_ms: u64,
}

/// Transmission report for a packet sent with an indication request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSent {
    pub pdu_id: u16,
    pub source_endpoint: Endpoint,
    pub destination: NodeAddress,
    pub destination_endpoint: Endpoint,
    /// Time spent in the stack buffers, in milliseconds.
    pub buffering_delay_ms: u32,
    /// True if the packet left the node.
    pub success: bool,
}

/// Outbound application packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    pub payload: Bytes,
    pub destination: NodeAddress,
    pub source_endpoint: Endpoint,
    pub destination_endpoint: Endpoint,
    pub qos: Qos,
    /// Identifier echoed in the transmission report.
    pub pdu_id: u16,
    /// Request a [`DataSent`] report when the packet leaves the node.
    pub request_report: bool,
    /// Send only to CB-MAC nodes without acknowledgement.
    pub unack_csma_ca: bool,
    /// Hop limit (0 = unlimited, at most 15).
    pub hop_limit: u8,
    /// Time the packet already spent buffered on the host, in milliseconds.
    pub buffering_delay_ms: u32,
}

impl DataMessage {
    /// Creates a message with default options.
    #[must_use]
    pub fn new(
        destination: NodeAddress,
        source_endpoint: Endpoint,
        destination_endpoint: Endpoint,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            payload: payload.into(),
            destination,
            source_endpoint,
            destination_endpoint,
            qos: Qos::Normal,
            pdu_id: 0,
            request_report: false,
            unack_csma_ca: false,
            hop_limit: 0,
            buffering_delay_ms: 0,
        }
    }

    /// Sets the QoS class.
    #[must_use]
    pub const fn qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    /// Requests a transmission report under the given PDU id.
    #[must_use]
    pub const fn with_report(mut self, pdu_id: u16) -> Self {
        self.pdu_id = pdu_id;
        self.request_report = true;
        self
    }

    /// Sets the hop limit.
    #[must_use]
    pub const fn hop_limit(mut self, hops: u8) -> Self {
        self.hop_limit = hops;
        self
    }

    /// Sets the initial buffering delay reported to the sink.
    #[must_use]
    pub const fn buffering_delay(mut self, delay_ms: u32) -> Self {
        self.buffering_delay_ms = delay_ms;
        self
    }
}
