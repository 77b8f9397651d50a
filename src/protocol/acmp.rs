//! ACMP (connection management) PDU encoding and decoding

use super::{ControlHeader, SUBTYPE_ACMP};
use crate::error::AcmpError;
use crate::types::{MacAddress, UniqueIdentifier};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// ACMP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AcmpMessageType {
    /// CONNECT_TX_COMMAND
    ConnectTxCommand = 0x00,
    /// CONNECT_TX_RESPONSE
    ConnectTxResponse = 0x01,
    /// DISCONNECT_TX_COMMAND
    DisconnectTxCommand = 0x02,
    /// DISCONNECT_TX_RESPONSE
    DisconnectTxResponse = 0x03,
    /// GET_TX_STATE_COMMAND
    GetTxStateCommand = 0x04,
    /// GET_TX_STATE_RESPONSE
    GetTxStateResponse = 0x05,
    /// CONNECT_RX_COMMAND
    ConnectRxCommand = 0x06,
    /// CONNECT_RX_RESPONSE
    ConnectRxResponse = 0x07,
    /// DISCONNECT_RX_COMMAND
    DisconnectRxCommand = 0x08,
    /// DISCONNECT_RX_RESPONSE
    DisconnectRxResponse = 0x09,
    /// GET_RX_STATE_COMMAND
    GetRxStateCommand = 0x0A,
    /// GET_RX_STATE_RESPONSE
    GetRxStateResponse = 0x0B,
    /// GET_TX_CONNECTION_COMMAND
    GetTxConnectionCommand = 0x0C,
    /// GET_TX_CONNECTION_RESPONSE
    GetTxConnectionResponse = 0x0D,
}

impl AcmpMessageType {
    /// Parse from the 4-bit message type field
    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Self::ConnectTxCommand,
            0x01 => Self::ConnectTxResponse,
            0x02 => Self::DisconnectTxCommand,
            0x03 => Self::DisconnectTxResponse,
            0x04 => Self::GetTxStateCommand,
            0x05 => Self::GetTxStateResponse,
            0x06 => Self::ConnectRxCommand,
            0x07 => Self::ConnectRxResponse,
            0x08 => Self::DisconnectRxCommand,
            0x09 => Self::DisconnectRxResponse,
            0x0A => Self::GetRxStateCommand,
            0x0B => Self::GetRxStateResponse,
            0x0C => Self::GetTxConnectionCommand,
            0x0D => Self::GetTxConnectionResponse,
            _ => return None,
        })
    }

    /// The response type matching this command type, if this is a command
    #[must_use]
    pub fn response_type(&self) -> Option<Self> {
        Some(match self {
            Self::ConnectTxCommand => Self::ConnectTxResponse,
            Self::DisconnectTxCommand => Self::DisconnectTxResponse,
            Self::GetTxStateCommand => Self::GetTxStateResponse,
            Self::ConnectRxCommand => Self::ConnectRxResponse,
            Self::DisconnectRxCommand => Self::DisconnectRxResponse,
            Self::GetRxStateCommand => Self::GetRxStateResponse,
            Self::GetTxConnectionCommand => Self::GetTxConnectionResponse,
            _ => return None,
        })
    }

    /// Whether this is a response type
    #[must_use]
    pub fn is_response(&self) -> bool {
        (*self as u8) & 1 == 1
    }
}

/// ACMP status codes (5-bit field of the control header)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcmpStatusCode(pub u8);

impl AcmpStatusCode {
    /// SUCCESS
    pub const SUCCESS: Self = Self(0);
    /// LISTENER_UNKNOWN_ID
    pub const LISTENER_UNKNOWN_ID: Self = Self(1);
    /// TALKER_UNKNOWN_ID
    pub const TALKER_UNKNOWN_ID: Self = Self(2);
    /// TALKER_DEST_MAC_FAIL
    pub const TALKER_DEST_MAC_FAIL: Self = Self(3);
    /// TALKER_NO_STREAM_INDEX
    pub const TALKER_NO_STREAM_INDEX: Self = Self(4);
    /// TALKER_NO_BANDWIDTH
    pub const TALKER_NO_BANDWIDTH: Self = Self(5);
    /// TALKER_EXCLUSIVE
    pub const TALKER_EXCLUSIVE: Self = Self(6);
    /// LISTENER_TALKER_TIMEOUT
    pub const LISTENER_TALKER_TIMEOUT: Self = Self(7);
    /// LISTENER_EXCLUSIVE
    pub const LISTENER_EXCLUSIVE: Self = Self(8);
    /// STATE_UNAVAILABLE
    pub const STATE_UNAVAILABLE: Self = Self(9);
    /// NOT_CONNECTED
    pub const NOT_CONNECTED: Self = Self(10);
    /// NO_SUCH_CONNECTION
    pub const NO_SUCH_CONNECTION: Self = Self(11);
    /// COULD_NOT_SEND_MESSAGE
    pub const COULD_NOT_SEND_MESSAGE: Self = Self(12);
    /// TALKER_MISBEHAVING
    pub const TALKER_MISBEHAVING: Self = Self(13);
    /// LISTENER_MISBEHAVING
    pub const LISTENER_MISBEHAVING: Self = Self(14);
    /// CONTROLLER_NOT_AUTHORIZED
    pub const CONTROLLER_NOT_AUTHORIZED: Self = Self(16);
    /// INCOMPATIBLE_REQUEST
    pub const INCOMPATIBLE_REQUEST: Self = Self(17);
    /// NOT_SUPPORTED
    pub const NOT_SUPPORTED: Self = Self(31);

    /// Whether this is SUCCESS
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.0 == 0
    }

    /// Map a non-success code to the user-facing error
    #[must_use]
    pub fn to_error(&self) -> Option<AcmpError> {
        Some(match self.0 {
            0 => return None,
            1 => AcmpError::ListenerUnknownId,
            2 => AcmpError::TalkerUnknownId,
            3 => AcmpError::TalkerDestMacFail,
            4 => AcmpError::TalkerNoStreamIndex,
            5 => AcmpError::TalkerNoBandwidth,
            6 => AcmpError::TalkerExclusive,
            7 => AcmpError::ListenerTalkerTimeout,
            8 => AcmpError::ListenerExclusive,
            9 => AcmpError::StateUnavailable,
            10 => AcmpError::NotConnected,
            11 => AcmpError::NoSuchConnection,
            12 => AcmpError::CouldNotSendMessage,
            13 => AcmpError::TalkerMisbehaving,
            14 => AcmpError::ListenerMisbehaving,
            16 => AcmpError::ControllerNotAuthorized,
            17 => AcmpError::IncompatibleRequest,
            31 => AcmpError::NotSupported,
            _ => AcmpError::InternalError,
        })
    }
}

/// An ACMP PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acmpdu {
    /// Message type
    pub message_type: AcmpMessageType,
    /// Status field (meaningful on responses)
    pub status: AcmpStatusCode,
    /// Stream id (talker entity id + unique id on established connections)
    pub stream_id: u64,
    /// Controller that issued the command
    pub controller_entity_id: UniqueIdentifier,
    /// Talker side of the connection
    pub talker_entity_id: UniqueIdentifier,
    /// Listener side of the connection
    pub listener_entity_id: UniqueIdentifier,
    /// Talker stream index
    pub talker_unique_id: u16,
    /// Listener stream index
    pub listener_unique_id: u16,
    /// Destination MAC of the stream
    pub stream_dest_mac: MacAddress,
    /// Connection count (only authoritative on GET_RX_STATE responses)
    pub connection_count: u16,
    /// Sequence id matching commands to responses
    pub sequence_id: u16,
    /// Connection flags
    pub flags: u16,
    /// Stream VLAN id
    pub stream_vlan_id: u16,
}

impl Acmpdu {
    /// Control data length of an ACMP PDU (bytes after the stream_id field)
    pub const CONTROL_DATA_LENGTH: u16 = 44;

    /// Build a command PDU with unset stream fields
    #[must_use]
    pub fn command(
        message_type: AcmpMessageType,
        controller_entity_id: UniqueIdentifier,
        talker_entity_id: UniqueIdentifier,
        talker_unique_id: u16,
        listener_entity_id: UniqueIdentifier,
        listener_unique_id: u16,
        sequence_id: u16,
    ) -> Self {
        Self {
            message_type,
            status: AcmpStatusCode::SUCCESS,
            stream_id: 0,
            controller_entity_id,
            talker_entity_id,
            listener_entity_id,
            talker_unique_id,
            listener_unique_id,
            stream_dest_mac: MacAddress::default(),
            connection_count: 0,
            sequence_id,
            flags: 0,
            stream_vlan_id: 0,
        }
    }

    /// Encode to the full PDU (control header + payload)
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf =
            BytesMut::with_capacity(ControlHeader::LEN + usize::from(Self::CONTROL_DATA_LENGTH));
        ControlHeader {
            subtype: SUBTYPE_ACMP,
            message_type: self.message_type as u8,
            status: self.status.0,
            control_data_length: Self::CONTROL_DATA_LENGTH,
            stream_id: self.stream_id,
        }
        .encode(&mut buf);
        buf.put_u64(self.controller_entity_id.value());
        buf.put_u64(self.talker_entity_id.value());
        buf.put_u64(self.listener_entity_id.value());
        buf.put_u16(self.talker_unique_id);
        buf.put_u16(self.listener_unique_id);
        buf.put_slice(self.stream_dest_mac.as_bytes());
        buf.put_u16(self.connection_count);
        buf.put_u16(self.sequence_id);
        buf.put_u16(self.flags);
        buf.put_u16(self.stream_vlan_id);
        buf.put_u16(0); // reserved
        buf.freeze()
    }

    /// Decode the payload following an already-parsed control header
    #[must_use]
    pub fn decode(header: &ControlHeader, buf: &mut impl Buf) -> Option<Self> {
        // everything after stream_id except the trailing reserved word
        if buf.remaining() < usize::from(Self::CONTROL_DATA_LENGTH) - 2 {
            return None;
        }
        let message_type = AcmpMessageType::from_wire(header.message_type)?;
        let controller_entity_id = UniqueIdentifier::new(buf.get_u64());
        let talker_entity_id = UniqueIdentifier::new(buf.get_u64());
        let listener_entity_id = UniqueIdentifier::new(buf.get_u64());
        let talker_unique_id = buf.get_u16();
        let listener_unique_id = buf.get_u16();
        let mut mac = [0u8; 6];
        buf.copy_to_slice(&mut mac);
        let connection_count = buf.get_u16();
        let sequence_id = buf.get_u16();
        let flags = buf.get_u16();
        let stream_vlan_id = buf.get_u16();

        Some(Self {
            message_type,
            status: AcmpStatusCode(header.status),
            stream_id: header.stream_id,
            controller_entity_id,
            talker_entity_id,
            listener_entity_id,
            talker_unique_id,
            listener_unique_id,
            stream_dest_mac: MacAddress::new(mac),
            connection_count,
            sequence_id,
            flags,
            stream_vlan_id,
        })
    }
}
