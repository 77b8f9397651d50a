//! ADP (discovery) PDU encoding and decoding

use super::{ControlHeader, SUBTYPE_ADP};
use crate::types::{EntityCapabilities, UniqueIdentifier};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// ADP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AdpMessageType {
    /// Periodic advertisement of a live entity
    EntityAvailable = 0x00,
    /// Announcement of an entity leaving the segment
    EntityDeparting = 0x01,
    /// Request for all entities to advertise
    EntityDiscover = 0x02,
}

impl AdpMessageType {
    /// Parse from the 4-bit message type field
    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::EntityAvailable),
            0x01 => Some(Self::EntityDeparting),
            0x02 => Some(Self::EntityDiscover),
            _ => None,
        }
    }
}

/// An ADP PDU.
///
/// `valid_time` is carried in the control header's status field and is
/// expressed in 2-second units on the wire; this struct holds seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adpdu {
    /// Message type
    pub message_type: AdpMessageType,
    /// Advertised validity in seconds (clamped to [1, 62] on encode)
    pub valid_time: u8,
    /// Advertising entity (or all-zero for ENTITY_DISCOVER broadcast)
    pub entity_id: UniqueIdentifier,
    /// Entity model identifier
    pub entity_model_id: UniqueIdentifier,
    /// Entity capability flags
    pub entity_capabilities: EntityCapabilities,
    /// Number of talker stream sources
    pub talker_stream_sources: u16,
    /// Talker capability flags
    pub talker_capabilities: u16,
    /// Number of listener stream sinks
    pub listener_stream_sinks: u16,
    /// Listener capability flags
    pub listener_capabilities: u16,
    /// Controller capability flags
    pub controller_capabilities: u32,
    /// Incremented on every state change of the advertising entity
    pub available_index: u32,
    /// Current gPTP grandmaster
    pub gptp_grandmaster_id: UniqueIdentifier,
    /// gPTP domain number
    pub gptp_domain_number: u8,
    /// Identify control descriptor index
    pub identify_control_index: u16,
    /// AVB interface descriptor index the PDU was sent from
    pub interface_index: u16,
    /// Association id
    pub association_id: UniqueIdentifier,
}

impl Adpdu {
    /// Control data length of an ADP PDU (bytes after the entity_id field)
    pub const CONTROL_DATA_LENGTH: u16 = 56;

    /// A minimal ENTITY_DISCOVER broadcast (all-zero target: everyone)
    #[must_use]
    pub fn discover() -> Self {
        Self {
            message_type: AdpMessageType::EntityDiscover,
            valid_time: 0,
            entity_id: UniqueIdentifier::NULL,
            entity_model_id: UniqueIdentifier::NULL,
            entity_capabilities: EntityCapabilities::default(),
            talker_stream_sources: 0,
            talker_capabilities: 0,
            listener_stream_sinks: 0,
            listener_capabilities: 0,
            controller_capabilities: 0,
            available_index: 0,
            gptp_grandmaster_id: UniqueIdentifier::NULL,
            gptp_domain_number: 0,
            identify_control_index: 0,
            interface_index: 0,
            association_id: UniqueIdentifier::NULL,
        }
    }

    /// Encode to the full PDU (control header + payload)
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ControlHeader::LEN + usize::from(Self::CONTROL_DATA_LENGTH));
        ControlHeader {
            subtype: SUBTYPE_ADP,
            message_type: self.message_type as u8,
            status: (self.valid_time.clamp(1, 62)) / 2,
            control_data_length: Self::CONTROL_DATA_LENGTH,
            stream_id: self.entity_id.value(),
        }
        .encode(&mut buf);
        buf.put_u64(self.entity_model_id.value());
        buf.put_u32(self.entity_capabilities.0);
        buf.put_u16(self.talker_stream_sources);
        buf.put_u16(self.talker_capabilities);
        buf.put_u16(self.listener_stream_sinks);
        buf.put_u16(self.listener_capabilities);
        buf.put_u32(self.controller_capabilities);
        buf.put_u32(self.available_index);
        buf.put_u64(self.gptp_grandmaster_id.value());
        buf.put_u8(self.gptp_domain_number);
        buf.put_bytes(0, 3); // reserved0
        buf.put_u16(self.identify_control_index);
        buf.put_u16(self.interface_index);
        buf.put_u64(self.association_id.value());
        buf.put_u32(0); // reserved1
        buf.freeze()
    }

    /// Decode the payload following an already-parsed control header
    #[must_use]
    pub fn decode(header: &ControlHeader, buf: &mut impl Buf) -> Option<Self> {
        // everything after entity_id except the trailing reserved word
        if buf.remaining() < usize::from(Self::CONTROL_DATA_LENGTH) - 4 {
            return None;
        }
        let message_type = AdpMessageType::from_wire(header.message_type)?;
        let entity_model_id = UniqueIdentifier::new(buf.get_u64());
        let entity_capabilities = EntityCapabilities(buf.get_u32());
        let talker_stream_sources = buf.get_u16();
        let talker_capabilities = buf.get_u16();
        let listener_stream_sinks = buf.get_u16();
        let listener_capabilities = buf.get_u16();
        let controller_capabilities = buf.get_u32();
        let available_index = buf.get_u32();
        let gptp_grandmaster_id = UniqueIdentifier::new(buf.get_u64());
        let gptp_domain_number = buf.get_u8();
        buf.advance(3); // reserved0
        let identify_control_index = buf.get_u16();
        let interface_index = buf.get_u16();
        let association_id = UniqueIdentifier::new(buf.get_u64());

        Some(Self {
            message_type,
            // status field carries valid_time in 2-second units
            valid_time: header.status * 2,
            entity_id: UniqueIdentifier::new(header.stream_id),
            entity_model_id,
            entity_capabilities,
            talker_stream_sources,
            talker_capabilities,
            listener_stream_sinks,
            listener_capabilities,
            controller_capabilities,
            available_index,
            gptp_grandmaster_id,
            gptp_domain_number,
            identify_control_index,
            interface_index,
            association_id,
        })
    }
}
