//! IEEE 1722.1 wire framing: AVTP control headers and the three PDU families

pub mod acmp;
pub mod adp;
pub mod aecp;
pub mod aem;
#[cfg(test)]
mod tests;

pub use acmp::{AcmpMessageType, AcmpStatusCode, Acmpdu};
pub use adp::{AdpMessageType, Adpdu};
pub use aecp::{AecpMessageType, AemCommandType, AemStatusCode, Aecpdu};

use crate::types::MacAddress;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// AVTP ethertype carrying all 1722.1 traffic
pub const ETHERTYPE_AVTP: u16 = 0x22F0;

/// Ethernet header length (no VLAN tag)
pub const ETHERNET_HEADER_LEN: usize = 14;

/// AVTPDU control subtype for ADP
pub const SUBTYPE_ADP: u8 = 0x7A;
/// AVTPDU control subtype for AECP
pub const SUBTYPE_AECP: u8 = 0x7B;
/// AVTPDU control subtype for ACMP
pub const SUBTYPE_ACMP: u8 = 0x7C;

/// Common AVTPDU control header (the first 12 bytes of every PDU)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlHeader {
    /// Control subtype (ADP / AECP / ACMP, without the cd bit)
    pub subtype: u8,
    /// 4-bit message type
    pub message_type: u8,
    /// 5-bit status (AECP/ACMP) or valid_time (ADP)
    pub status: u8,
    /// 11-bit control data length (bytes following the stream_id field)
    pub control_data_length: u16,
    /// stream_id field: entity id for ADP/AECP, stream id for ACMP
    pub stream_id: u64,
}

impl ControlHeader {
    /// Size of the control header on the wire
    pub const LEN: usize = 12;

    /// Encode into a buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(0x80 | self.subtype); // cd=1
        buf.put_u8(0x80 | (self.message_type & 0x0F)); // sv=1, version=0
        buf.put_u16((u16::from(self.status) << 11) | (self.control_data_length & 0x07FF));
        buf.put_u64(self.stream_id);
    }

    /// Decode from a buffer; `None` if truncated or not a control PDU
    #[must_use]
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::LEN {
            return None;
        }
        let b0 = buf.get_u8();
        if b0 & 0x80 == 0 {
            return None; // not a control frame
        }
        let b1 = buf.get_u8();
        let w = buf.get_u16();
        Some(Self {
            subtype: b0 & 0x7F,
            message_type: b1 & 0x0F,
            status: (w >> 11) as u8,
            control_data_length: w & 0x07FF,
            stream_id: buf.get_u64(),
        })
    }
}

/// A parsed 1722.1 PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    /// Discovery protocol
    Adp(Adpdu),
    /// Enumeration and control protocol
    Aecp(Aecpdu),
    /// Connection management protocol
    Acmp(Acmpdu),
}

/// A received frame, decoded down to the PDU
#[derive(Debug, Clone)]
pub struct ReceivedPdu {
    /// Source MAC of the Ethernet frame
    pub src_mac: MacAddress,
    /// Destination MAC of the Ethernet frame
    pub dst_mac: MacAddress,
    /// The decoded PDU
    pub pdu: Pdu,
}

/// Build a full Ethernet frame around an already-encoded PDU
#[must_use]
pub fn ethernet_frame(dst: MacAddress, src: MacAddress, pdu: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(ETHERNET_HEADER_LEN + pdu.len());
    buf.put_slice(dst.as_bytes());
    buf.put_slice(src.as_bytes());
    buf.put_u16(ETHERTYPE_AVTP);
    buf.put_slice(pdu);
    buf.freeze()
}

/// Parse a received Ethernet frame into a PDU.
///
/// Returns `None` for anything that is not a well-formed 1722.1 control
/// frame of a subtype we understand. Malformed frames are dropped silently
/// here; the caller decides what to log.
#[must_use]
pub fn parse_frame(frame: &[u8]) -> Option<ReceivedPdu> {
    if frame.len() < ETHERNET_HEADER_LEN {
        return None;
    }
    let dst_mac = MacAddress::new(frame[0..6].try_into().ok()?);
    let src_mac = MacAddress::new(frame[6..12].try_into().ok()?);
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETHERTYPE_AVTP {
        return None;
    }

    let mut payload = &frame[ETHERNET_HEADER_LEN..];
    let header = ControlHeader::decode(&mut payload)?;
    let pdu = match header.subtype {
        SUBTYPE_ADP => Pdu::Adp(Adpdu::decode(&header, &mut payload)?),
        SUBTYPE_AECP => Pdu::Aecp(Aecpdu::decode(&header, &mut payload)?),
        SUBTYPE_ACMP => Pdu::Acmp(Acmpdu::decode(&header, &mut payload)?),
        _ => return None,
    };

    Some(ReceivedPdu {
        src_mac,
        dst_mac,
        pdu,
    })
}
