//! Request encoding.
//!
//! A [`Request`] is turned into a [`Frame`] once the connection has
//! allocated a frame id for it.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::attribute::{CsapAttribute, FACTORY_RESET_KEY, MsapAttribute};
use crate::protocol::frame::{Frame, MAX_PAYLOAD};
use crate::protocol::primitive::Primitive;
use crate::types::{DataMessage, NodeAddress, Qos};

/// Largest application payload in a single data request.
pub const MAX_DATA_PDU_SIZE: usize = 102;

/// Largest app config payload accepted by any node.
pub const MAX_APP_CONFIG_SIZE: usize = 80;

/// A request to the coordinator node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Read a configuration attribute.
    CsapRead(CsapAttribute),
    /// Write a configuration attribute.
    CsapWrite(CsapAttribute, Bytes),
    /// Read a management attribute.
    MsapRead(MsapAttribute),
    /// Write a management attribute.
    MsapWrite(MsapAttribute, Bytes),
    /// Read app config data.
    AppConfigRead,
    /// Write app config data, zero-padded to `size` bytes.
    AppConfigWrite {
        sequence: u8,
        interval_s: u16,
        data: Bytes,
        size: usize,
    },
    /// Start the stack.
    StackStart,
    /// Stop the stack.
    StackStop,
    /// Poll for pending indications.
    IndicationPoll,
    /// Start a neighbor scan.
    ScanNeighbors,
    /// Read the neighbor list.
    GetNeighbors,
    /// Read the sink cost.
    SinkCostRead,
    /// Write the sink cost.
    SinkCostWrite(u8),
    /// Ask a remote node for its scratchpad status.
    RemoteStatus(NodeAddress),
    /// Factory reset the node.
    FactoryReset,
    /// Transmit application data.
    DataTx(DataMessage),
}

impl Request {
    /// Returns the request primitive.
    #[must_use]
    pub const fn primitive(&self) -> Primitive {
        match self {
            Self::CsapRead(_) => Primitive::CsapAttributeRead,
            Self::CsapWrite(..) => Primitive::CsapAttributeWrite,
            Self::MsapRead(_) => Primitive::MsapAttributeRead,
            Self::MsapWrite(..) => Primitive::MsapAttributeWrite,
            Self::AppConfigRead => Primitive::AppConfigRead,
            Self::AppConfigWrite { .. } => Primitive::AppConfigWrite,
            Self::StackStart => Primitive::StackStart,
            Self::StackStop => Primitive::StackStop,
            Self::IndicationPoll => Primitive::IndicationPoll,
            Self::ScanNeighbors => Primitive::ScanNeighbors,
            Self::GetNeighbors => Primitive::GetNeighbors,
            Self::SinkCostRead => Primitive::SinkCostRead,
            Self::SinkCostWrite(_) => Primitive::SinkCostWrite,
            Self::RemoteStatus(_) => Primitive::RemoteStatus,
            Self::FactoryReset => Primitive::FactoryReset,
            Self::DataTx(msg) if msg.buffering_delay_ms > 0 => Primitive::DataTxTt,
            Self::DataTx(_) => Primitive::DataTx,
        }
    }

    /// Validates the request and builds its frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if a value does not fit the wire
    /// format.
    pub fn encode(&self, frame_id: u8) -> Result<Frame> {
        let payload = self.payload()?;
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::invalid(format!(
                "payload of {} bytes exceeds frame capacity",
                payload.len()
            )));
        }
        Ok(Frame::new(u8::from(self.primitive()), frame_id, payload))
    }

    fn payload(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        match self {
            Self::CsapRead(attr) => buf.put_u16_le(*attr as u16),
            Self::MsapRead(attr) => buf.put_u16_le(*attr as u16),
            Self::CsapWrite(attr, value) => {
                if value.len() != attr.value_len() {
                    return Err(Error::invalid(format!(
                        "attribute {attr:?} takes {} bytes, got {}",
                        attr.value_len(),
                        value.len()
                    )));
                }
                buf.put_u16_le(*attr as u16);
                buf.put_u8(value.len() as u8);
                buf.put_slice(value);
            }
            Self::MsapWrite(attr, value) => {
                if value.len() != attr.value_len() {
                    return Err(Error::invalid(format!(
                        "attribute {attr:?} takes {} bytes, got {}",
                        attr.value_len(),
                        value.len()
                    )));
                }
                buf.put_u16_le(*attr as u16);
                buf.put_u8(value.len() as u8);
                buf.put_slice(value);
            }
            Self::AppConfigWrite {
                sequence,
                interval_s,
                data,
                size,
            } => {
                if data.len() > *size || *size > MAX_APP_CONFIG_SIZE {
                    return Err(Error::invalid(format!(
                        "app config of {} bytes exceeds node maximum of {size}",
                        data.len()
                    )));
                }
                buf.put_u8(*sequence);
                buf.put_u16_le(*interval_s);
                buf.put_slice(data);
                buf.put_bytes(0, size - data.len());
            }
            Self::StackStart => buf.put_u8(0),
            Self::SinkCostWrite(cost) => buf.put_u8(*cost),
            Self::RemoteStatus(target) => buf.put_u32_le(target.0),
            Self::FactoryReset => buf.put_slice(&FACTORY_RESET_KEY),
            Self::DataTx(msg) => put_data_tx(&mut buf, msg)?,
            Self::AppConfigRead
            | Self::StackStop
            | Self::IndicationPoll
            | Self::ScanNeighbors
            | Self::GetNeighbors
            | Self::SinkCostRead => {}
        }
        Ok(buf.freeze())
    }
}

fn put_data_tx(buf: &mut BytesMut, msg: &DataMessage) -> Result<()> {
    if msg.payload.len() > MAX_DATA_PDU_SIZE {
        return Err(Error::invalid(format!(
            "data payload of {} bytes exceeds {MAX_DATA_PDU_SIZE}",
            msg.payload.len()
        )));
    }
    if msg.hop_limit > 0x0f {
        return Err(Error::invalid(format!(
            "hop limit {} exceeds 15",
            msg.hop_limit
        )));
    }

    let mut tx_options = (msg.hop_limit & 0x0f) << 2;
    if msg.request_report {
        tx_options |= 0x01;
    }
    if msg.unack_csma_ca {
        tx_options |= 0x02;
    }

    buf.put_u16_le(msg.pdu_id);
    buf.put_u8(msg.source_endpoint.0);
    buf.put_u32_le(msg.destination.0);
    buf.put_u8(msg.destination_endpoint.0);
    buf.put_u8(match msg.qos {
        Qos::Normal => 0,
        Qos::High => 1,
    });
    buf.put_u8(tx_options);
    if msg.buffering_delay_ms > 0 {
        buf.put_u32_le(ms_to_internal_time(msg.buffering_delay_ms));
    }
    buf.put_u8(msg.payload.len() as u8);
    buf.put_slice(&msg.payload);
    Ok(())
}

/// Converts milliseconds to the node's 1/128 s time unit.
#[must_use]
pub const fn ms_to_internal_time(ms: u32) -> u32 {
    ((ms as u64 * 128) / 1000) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Endpoint;

    #[test]
    fn test_attribute_read_layout() {
        let frame = Request::CsapRead(CsapAttribute::NetworkChannel)
            .encode(9)
            .unwrap();
        assert_eq!(frame.primitive_id, 0x0E);
        assert_eq!(frame.frame_id, 9);
        assert_eq!(&frame.payload[..], &[3, 0]);
    }

    #[test]
    fn test_attribute_write_checks_length() {
        let ok = Request::CsapWrite(CsapAttribute::NetworkAddress, Bytes::from_static(&[1, 2, 3]))
            .encode(0)
            .unwrap();
        assert_eq!(&ok.payload[..], &[2, 0, 3, 1, 2, 3]);

        let bad = Request::CsapWrite(CsapAttribute::NetworkAddress, Bytes::from_static(&[1]));
        assert!(matches!(bad.encode(0), Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn test_msap_write_layout() {
        let frame = Request::MsapWrite(MsapAttribute::Autostart, Bytes::from_static(&[1]))
            .encode(9)
            .unwrap();
        assert_eq!(frame.primitive_id, 0x0B);
        assert_eq!(&frame.payload[..], &[6, 0, 1, 1]);

        let bad = Request::MsapWrite(MsapAttribute::AccessCycleRange, Bytes::from_static(&[1, 2]));
        assert!(matches!(bad.encode(0), Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn test_app_config_is_padded() {
        let frame = Request::AppConfigWrite {
            sequence: 3,
            interval_s: 60,
            data: Bytes::from_static(b"cfg"),
            size: 8,
        }
        .encode(1)
        .unwrap();
        assert_eq!(&frame.payload[..], &[3, 60, 0, b'c', b'f', b'g', 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_data_tx_options() {
        let msg = DataMessage::new(NodeAddress(0x0102_0304), Endpoint(1), Endpoint(2), &b"hi"[..])
            .with_report(0x0a0b)
            .hop_limit(3);
        let frame = Request::DataTx(msg).encode(0).unwrap();
        assert_eq!(frame.primitive_id, 0x01);
        assert_eq!(
            &frame.payload[..],
            &[0x0b, 0x0a, 1, 4, 3, 2, 1, 2, 0, 0x0d, 2, b'h', b'i']
        );
    }

    #[test]
    fn test_data_tx_rejects_large_payload() {
        let msg = DataMessage::new(NodeAddress(1), Endpoint(1), Endpoint(1), vec![0u8; 103]);
        assert!(matches!(
            Request::DataTx(msg).encode(0),
            Err(Error::InvalidParameter { .. })
        ));
    }
}
