//! Decoding of frames received from the node.
//!
//! Every frame is either a confirm answering one of our requests or an
//! indication pushed by the node. Indications start with an
//! `indication_status` byte telling whether more indications are queued.

use bytes::{Buf, Bytes};

use crate::error::FrameError;
use crate::event::Event;
use crate::protocol::frame::Frame;
use crate::protocol::primitive::{IndicationId, Primitive, is_confirm};
use crate::types::{
    DataSent, DiagnosticConfig, Endpoint, NeighborInfo, NodeAddress, Qos, ReceivedData,
    RemoteStatus, ScanNeighborsDone, ScratchpadStatus, StackStatus,
};

/// Number of entries in a neighbor list confirm.
const MAX_NEIGHBORS: usize = 8;

/// Size of one neighbor entry on the wire.
const NEIGHBOR_ENTRY_SIZE: usize = 13;

/// Size of a scratchpad status block on the wire.
const SCRATCHPAD_STATUS_SIZE: usize = 24;

/// Decoded body of a confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmBody {
    /// Generic result byte.
    Status(u8),
    /// Attribute read answer. `value` is empty unless `result` is 0.
    Attribute {
        result: u8,
        attribute: u16,
        value: Bytes,
    },
    /// App config read answer. `config` is `None` unless `result` is 0.
    AppConfig {
        result: u8,
        config: Option<DiagnosticConfig>,
    },
    /// Sink cost read answer.
    SinkCost { result: u8, cost: u8 },
    /// Neighbor list.
    Neighbors(Vec<NeighborInfo>),
    /// Data transmit answer.
    DataTx {
        pdu_id: u16,
        result: u8,
        capacity: u8,
    },
}

impl ConfirmBody {
    /// Returns the node result code carried by the confirm.
    #[must_use]
    pub const fn result(&self) -> u8 {
        match self {
            Self::Status(result)
            | Self::Attribute { result, .. }
            | Self::AppConfig { result, .. }
            | Self::SinkCost { result, .. }
            | Self::DataTx { result, .. } => *result,
            Self::Neighbors(_) => 0,
        }
    }
}

/// A confirm matched to its request by primitive and frame id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirm {
    pub primitive: Primitive,
    pub frame_id: u8,
    pub body: ConfirmBody,
}

/// A decoded indication.
#[derive(Debug, Clone, PartialEq)]
pub struct Indication {
    pub id: IndicationId,
    pub frame_id: u8,
    /// True if the node has more indications queued.
    pub more: bool,
    pub event: Event,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Confirm(Confirm),
    Indication(Indication),
}

/// Decodes a frame received from the node.
///
/// `received_at_ms` is the host reception timestamp stamped on data
/// indications.
pub fn decode(frame: &Frame, received_at_ms: u64) -> Result<Inbound, FrameError> {
    if is_confirm(frame.primitive_id) {
        let primitive = Primitive::from_confirm_id(frame.primitive_id)
            .ok_or(FrameError::UnknownPrimitive(frame.primitive_id))?;
        let body = parse_confirm_body(primitive, &frame.payload)?;
        return Ok(Inbound::Confirm(Confirm {
            primitive,
            frame_id: frame.frame_id,
            body,
        }));
    }

    let id = IndicationId::from_byte(frame.primitive_id)
        .ok_or(FrameError::UnknownPrimitive(frame.primitive_id))?;
    let (more, event) = parse_indication(id, &frame.payload, received_at_ms)?;
    Ok(Inbound::Indication(Indication {
        id,
        frame_id: frame.frame_id,
        more,
        event,
    }))
}

fn need(what: &'static str, data: &[u8], len: usize) -> Result<(), FrameError> {
    if data.len() < len {
        return Err(FrameError::Truncated {
            what,
            need: len,
            got: data.len(),
        });
    }
    Ok(())
}

fn parse_confirm_body(primitive: Primitive, data: &[u8]) -> Result<ConfirmBody, FrameError> {
    match primitive {
        Primitive::CsapAttributeRead | Primitive::MsapAttributeRead => parse_attribute_read(data),
        Primitive::AppConfigRead => parse_app_config_read(data),
        Primitive::SinkCostRead => {
            need("sink cost confirm", data, 2)?;
            Ok(ConfirmBody::SinkCost {
                result: data[0],
                cost: data[1],
            })
        }
        Primitive::GetNeighbors => parse_neighbors(data).map(ConfirmBody::Neighbors),
        Primitive::DataTx | Primitive::DataTxTt => {
            need("data tx confirm", data, 4)?;
            let mut cursor = data;
            Ok(ConfirmBody::DataTx {
                pdu_id: cursor.get_u16_le(),
                result: cursor.get_u8(),
                capacity: cursor.get_u8(),
            })
        }
        _ => {
            need("confirm", data, 1)?;
            Ok(ConfirmBody::Status(data[0]))
        }
    }
}

/// Parses an attribute read confirm.
///
/// Format:
/// ```text
/// [result:1] [attribute_id:2LE] [length:1] [value:length]
/// ```
/// The length and value are only meaningful when the result is 0.
fn parse_attribute_read(data: &[u8]) -> Result<ConfirmBody, FrameError> {
    need("attribute read confirm", data, 3)?;
    let mut cursor = data;
    let result = cursor.get_u8();
    let attribute = cursor.get_u16_le();

    let value = if result == 0 {
        need("attribute read confirm", data, 4)?;
        let len = usize::from(cursor.get_u8());
        need("attribute value", cursor, len)?;
        Bytes::copy_from_slice(&cursor[..len])
    } else {
        Bytes::new()
    };

    Ok(ConfirmBody::Attribute {
        result,
        attribute,
        value,
    })
}

/// Parses an app config read confirm.
///
/// Format:
/// ```text
/// [result:1] [sequence:1] [interval:2LE] [data:...]
/// ```
fn parse_app_config_read(data: &[u8]) -> Result<ConfirmBody, FrameError> {
    need("app config confirm", data, 1)?;
    let result = data[0];
    if result != 0 {
        return Ok(ConfirmBody::AppConfig {
            result,
            config: None,
        });
    }
    Ok(ConfirmBody::AppConfig {
        result,
        config: Some(parse_app_config(&data[1..])?),
    })
}

fn parse_app_config(data: &[u8]) -> Result<DiagnosticConfig, FrameError> {
    need("app config", data, 3)?;
    let mut cursor = data;
    let sequence = cursor.get_u8();
    let interval_s = cursor.get_u16_le();
    Ok(DiagnosticConfig {
        sequence,
        interval_s,
        data: Bytes::copy_from_slice(cursor),
    })
}

/// Parses a neighbor list confirm.
///
/// Format:
/// ```text
/// [count:1] 8 x ([address:4LE] [link_rel:1] [rssi:1] [cost:1] [channel:1]
///               [type:1] [tx_power:1] [rx_power:1] [last_update:2LE])
/// ```
/// Only the first `count` entries are decoded.
fn parse_neighbors(data: &[u8]) -> Result<Vec<NeighborInfo>, FrameError> {
    need("neighbor confirm", data, 1)?;
    let count = usize::from(data[0]).min(MAX_NEIGHBORS);
    let mut cursor = &data[1..];
    need("neighbor list", cursor, count * NEIGHBOR_ENTRY_SIZE)?;

    let mut neighbors = Vec::with_capacity(count);
    for _ in 0..count {
        neighbors.push(NeighborInfo {
            address: NodeAddress(cursor.get_u32_le()),
            link_reliability: cursor.get_u8(),
            normalized_rssi: cursor.get_u8(),
            cost: cursor.get_u8(),
            channel: cursor.get_u8(),
            neighbor_type: cursor.get_u8(),
            tx_power: cursor.get_u8(),
            rx_power: cursor.get_u8(),
            last_update_s: cursor.get_u16_le(),
        });
    }
    Ok(neighbors)
}

fn parse_indication(
    id: IndicationId,
    data: &[u8],
    received_at_ms: u64,
) -> Result<(bool, Event), FrameError> {
    need("indication", data, 1)?;
    let more = data[0] != 0;
    let body = &data[1..];

    let event = match id {
        IndicationId::DataRx => Event::DataReceived(parse_data_rx(body, received_at_ms)?),
        IndicationId::DataTx => Event::DataSent(parse_data_tx(body)?),
        IndicationId::StackState => {
            need("stack state indication", body, 1)?;
            Event::StackStatusChanged(StackStatus(body[0]))
        }
        IndicationId::AppConfigRx => Event::AppConfigChanged(parse_app_config(body)?),
        IndicationId::RemoteStatus => Event::RemoteStatus(parse_remote_status(body)?),
        IndicationId::ScanNeighbors => {
            need("scan neighbors indication", body, 1)?;
            Event::ScanNeighborsDone(ScanNeighborsDone {
                ready: body[0] == 1,
            })
        }
    };
    Ok((more, event))
}

/// Parses a data received indication (after the status byte).
///
/// Format:
/// ```text
/// [src:4LE] [src_ep:1] [dst:4LE] [dst_ep:1] [qos_hops:1]
/// [travel_time:4LE] [apdu_len:1] [apdu:...]
/// ```
fn parse_data_rx(data: &[u8], received_at_ms: u64) -> Result<ReceivedData, FrameError> {
    need("data indication", data, 16)?;
    let mut cursor = data;
    let source = NodeAddress(cursor.get_u32_le());
    let source_endpoint = Endpoint(cursor.get_u8());
    let destination = NodeAddress(cursor.get_u32_le());
    let destination_endpoint = Endpoint(cursor.get_u8());
    let qos_hops = cursor.get_u8();
    let travel_time = cursor.get_u32_le();
    let len = usize::from(cursor.get_u8());
    need("data payload", cursor, len)?;

    Ok(ReceivedData {
        payload: Bytes::copy_from_slice(&cursor[..len]),
        source,
        destination,
        source_endpoint,
        destination_endpoint,
        qos: if qos_hops & 0x01 != 0 {
            Qos::High
        } else {
            Qos::Normal
        },
        travel_time_ms: internal_time_to_ms(travel_time),
        hop_count: qos_hops >> 2,
        received_at_ms,
    })
}

fn parse_data_tx(data: &[u8]) -> Result<DataSent, FrameError> {
    need("data sent indication", data, 13)?;
    let mut cursor = data;
    Ok(DataSent {
        pdu_id: cursor.get_u16_le(),
        source_endpoint: Endpoint(cursor.get_u8()),
        destination: NodeAddress(cursor.get_u32_le()),
        destination_endpoint: Endpoint(cursor.get_u8()),
        buffering_delay_ms: internal_time_to_ms(cursor.get_u32_le()),
        success: cursor.get_u8() == 0,
    })
}

fn parse_remote_status(data: &[u8]) -> Result<RemoteStatus, FrameError> {
    need("remote status indication", data, 4 + SCRATCHPAD_STATUS_SIZE + 2)?;
    let mut cursor = data;
    let source = NodeAddress(cursor.get_u32_le());
    let status = ScratchpadStatus {
        length: cursor.get_u32_le(),
        crc: cursor.get_u16_le(),
        sequence: cursor.get_u8(),
        kind: cursor.get_u8(),
        status: cursor.get_u8(),
        processed_length: cursor.get_u32_le(),
        processed_crc: cursor.get_u16_le(),
        processed_sequence: cursor.get_u8(),
        firmware_area_id: cursor.get_u32_le(),
        firmware: [
            cursor.get_u8(),
            cursor.get_u8(),
            cursor.get_u8(),
            cursor.get_u8(),
        ],
    };
    Ok(RemoteStatus {
        source,
        status,
        update_timeout_s: cursor.get_u16_le(),
    })
}

/// Converts the node's 1/128 s time unit to milliseconds.
#[must_use]
pub const fn internal_time_to_ms(internal: u32) -> u32 {
    ((internal as u64 * 1000) / 128) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_read_confirm() {
        let frame = Frame::new(0x8E, 4, vec![0, 3, 0, 1, 5]);
        let Inbound::Confirm(confirm) = decode(&frame, 0).unwrap() else {
            panic!("expected confirm");
        };
        assert_eq!(confirm.primitive, Primitive::CsapAttributeRead);
        assert_eq!(confirm.frame_id, 4);
        assert_eq!(
            confirm.body,
            ConfirmBody::Attribute {
                result: 0,
                attribute: 3,
                value: Bytes::from_static(&[5]),
            }
        );
    }

    #[test]
    fn test_attribute_read_unset_has_no_value() {
        let frame = Frame::new(0x8E, 1, vec![4, 1, 0, 0]);
        let Inbound::Confirm(confirm) = decode(&frame, 0).unwrap() else {
            panic!("expected confirm");
        };
        assert_eq!(confirm.body.result(), 4);
    }

    #[test]
    fn test_truncated_attribute_value() {
        let frame = Frame::new(0x8E, 1, vec![0, 2, 0, 3, 0x56]);
        assert!(matches!(
            decode(&frame, 0),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn test_data_rx_indication() {
        let mut payload = vec![0x00];
        payload.extend_from_slice(&0x10u32.to_le_bytes());
        payload.push(3);
        payload.extend_from_slice(&0x01u32.to_le_bytes());
        payload.push(7);
        payload.push(0b0000_1001);
        payload.extend_from_slice(&128u32.to_le_bytes());
        payload.push(2);
        payload.extend_from_slice(b"ok");

        let frame = Frame::new(0x03, 11, payload);
        let Inbound::Indication(ind) = decode(&frame, 42).unwrap() else {
            panic!("expected indication");
        };
        assert!(!ind.more);
        assert_eq!(ind.frame_id, 11);
        let Event::DataReceived(data) = ind.event else {
            panic!("expected data");
        };
        assert_eq!(data.source, NodeAddress(0x10));
        assert_eq!(data.destination_endpoint, Endpoint(7));
        assert_eq!(data.qos, Qos::High);
        assert_eq!(data.hop_count, 2);
        assert_eq!(data.travel_time_ms, 1000);
        assert_eq!(data.received_at_ms, 42);
        assert_eq!(&data.payload[..], b"ok");
    }

    #[test]
    fn test_app_config_indication() {
        let frame = Frame::new(0x3F, 2, vec![1, 9, 0x2c, 0x01, 0xaa, 0xbb]);
        let Inbound::Indication(ind) = decode(&frame, 0).unwrap() else {
            panic!("expected indication");
        };
        assert!(ind.more);
        assert_eq!(
            ind.event,
            Event::AppConfigChanged(DiagnosticConfig {
                sequence: 9,
                interval_s: 300,
                data: Bytes::from_static(&[0xaa, 0xbb]),
            })
        );
    }

    #[test]
    fn test_neighbors_respect_count() {
        let mut payload = vec![1];
        payload.extend_from_slice(&5u32.to_le_bytes());
        payload.extend_from_slice(&[90, 40, 1, 7, 2, 8, 4]);
        payload.extend_from_slice(&30u16.to_le_bytes());
        payload.resize(1 + MAX_NEIGHBORS * NEIGHBOR_ENTRY_SIZE, 0);

        let frame = Frame::new(0xA0, 0, payload);
        let Inbound::Confirm(confirm) = decode(&frame, 0).unwrap() else {
            panic!("expected confirm");
        };
        let ConfirmBody::Neighbors(list) = confirm.body else {
            panic!("expected neighbors");
        };
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].address, NodeAddress(5));
        assert_eq!(list[0].last_update_s, 30);
    }

    #[test]
    fn test_unknown_primitive() {
        assert_eq!(
            decode(&Frame::new(0x55, 0, vec![0]), 0),
            Err(FrameError::UnknownPrimitive(0x55))
        );
    }
}
