//! Protocol definitions for coordinator communication.
//!
//! This module contains the low-level protocol types including:
//! - SLIP framing and CRC
//! - Frame layout and primitive identifiers
//! - Attribute identifiers and node result codes
//! - Request encoding and confirm/indication decoding

pub mod attribute;
pub mod frame;
pub mod parser;
pub mod primitive;
pub mod request;
pub mod slip;

pub use attribute::{CsapAttribute, MsapAttribute};
pub use frame::Frame;
pub use parser::{Confirm, ConfirmBody, Inbound, Indication, decode};
pub use primitive::{IndicationId, Primitive};
pub use request::Request;
pub use slip::{SlipDecoder, crc16, encode as encode_slip};
