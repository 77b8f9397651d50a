//! AECP (enumeration and control) PDU encoding and decoding

use super::{ControlHeader, SUBTYPE_AECP};
use crate::error::AemError;
use crate::types::UniqueIdentifier;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// AECP message types (AEM subset)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AecpMessageType {
    /// AEM command, controller to entity
    AemCommand = 0x00,
    /// AEM response, entity to controller
    AemResponse = 0x01,
}

impl AecpMessageType {
    /// Parse from the 4-bit message type field
    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::AemCommand),
            0x01 => Some(Self::AemResponse),
            _ => None,
        }
    }
}

/// AEM command codes (IEEE 1722.1-2013 Table 7.126, controller subset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum AemCommandType {
    /// ACQUIRE_ENTITY
    AcquireEntity = 0x0000,
    /// LOCK_ENTITY
    LockEntity = 0x0001,
    /// ENTITY_AVAILABLE
    EntityAvailable = 0x0002,
    /// CONTROLLER_AVAILABLE
    ControllerAvailable = 0x0003,
    /// READ_DESCRIPTOR
    ReadDescriptor = 0x0004,
    /// SET_CONFIGURATION
    SetConfiguration = 0x0006,
    /// GET_CONFIGURATION
    GetConfiguration = 0x0007,
    /// SET_STREAM_FORMAT
    SetStreamFormat = 0x0008,
    /// GET_STREAM_FORMAT
    GetStreamFormat = 0x0009,
    /// SET_NAME
    SetName = 0x0010,
    /// GET_NAME
    GetName = 0x0011,
    /// SET_SAMPLING_RATE
    SetSamplingRate = 0x0014,
    /// GET_SAMPLING_RATE
    GetSamplingRate = 0x0015,
    /// SET_CLOCK_SOURCE
    SetClockSource = 0x0016,
    /// GET_CLOCK_SOURCE
    GetClockSource = 0x0017,
    /// START_STREAMING
    StartStreaming = 0x0022,
    /// STOP_STREAMING
    StopStreaming = 0x0023,
    /// GET_AUDIO_MAP
    GetAudioMap = 0x002B,
    /// ADD_AUDIO_MAPPINGS
    AddAudioMappings = 0x002C,
    /// REMOVE_AUDIO_MAPPINGS
    RemoveAudioMappings = 0x002D,
    /// SET_MEMORY_OBJECT_LENGTH
    SetMemoryObjectLength = 0x0047,
    /// GET_MEMORY_OBJECT_LENGTH
    GetMemoryObjectLength = 0x0048,
}

impl AemCommandType {
    /// Parse from the 15-bit command type field
    #[must_use]
    pub fn from_wire(value: u16) -> Option<Self> {
        Some(match value & 0x7FFF {
            0x0000 => Self::AcquireEntity,
            0x0001 => Self::LockEntity,
            0x0002 => Self::EntityAvailable,
            0x0003 => Self::ControllerAvailable,
            0x0004 => Self::ReadDescriptor,
            0x0006 => Self::SetConfiguration,
            0x0007 => Self::GetConfiguration,
            0x0008 => Self::SetStreamFormat,
            0x0009 => Self::GetStreamFormat,
            0x0010 => Self::SetName,
            0x0011 => Self::GetName,
            0x0014 => Self::SetSamplingRate,
            0x0015 => Self::GetSamplingRate,
            0x0016 => Self::SetClockSource,
            0x0017 => Self::GetClockSource,
            0x0022 => Self::StartStreaming,
            0x0023 => Self::StopStreaming,
            0x002B => Self::GetAudioMap,
            0x002C => Self::AddAudioMappings,
            0x002D => Self::RemoveAudioMappings,
            0x0047 => Self::SetMemoryObjectLength,
            0x0048 => Self::GetMemoryObjectLength,
            _ => return None,
        })
    }
}

/// AEM status codes (5-bit field of the control header)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AemStatusCode(pub u8);

impl AemStatusCode {
    /// SUCCESS
    pub const SUCCESS: Self = Self(0);
    /// NOT_IMPLEMENTED
    pub const NOT_IMPLEMENTED: Self = Self(1);
    /// NO_SUCH_DESCRIPTOR
    pub const NO_SUCH_DESCRIPTOR: Self = Self(2);
    /// ENTITY_LOCKED
    pub const ENTITY_LOCKED: Self = Self(3);
    /// ENTITY_ACQUIRED
    pub const ENTITY_ACQUIRED: Self = Self(4);
    /// NOT_AUTHENTICATED
    pub const NOT_AUTHENTICATED: Self = Self(5);
    /// AUTHENTICATION_DISABLED
    pub const AUTHENTICATION_DISABLED: Self = Self(6);
    /// BAD_ARGUMENTS
    pub const BAD_ARGUMENTS: Self = Self(7);
    /// NO_RESOURCES
    pub const NO_RESOURCES: Self = Self(8);
    /// IN_PROGRESS
    pub const IN_PROGRESS: Self = Self(9);
    /// ENTITY_MISBEHAVING
    pub const ENTITY_MISBEHAVING: Self = Self(10);
    /// NOT_SUPPORTED
    pub const NOT_SUPPORTED: Self = Self(11);
    /// STREAM_IS_RUNNING
    pub const STREAM_IS_RUNNING: Self = Self(12);

    /// Whether this is SUCCESS
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.0 == 0
    }

    /// Map a non-success code to the user-facing error.
    ///
    /// ENTITY_ACQUIRED does not carry the owner here; callers that need it
    /// decode the response payload and attach it.
    #[must_use]
    pub fn to_error(&self) -> Option<AemError> {
        Some(match self.0 {
            0 => return None,
            1 => AemError::NotImplemented,
            2 => AemError::NoSuchDescriptor,
            3 => AemError::LockedByOther,
            4 => AemError::AcquiredByOther {
                owner: UniqueIdentifier::NULL,
            },
            5 => AemError::NotAuthenticated,
            6 => AemError::AuthenticationDisabled,
            7 => AemError::BadArguments,
            8 => AemError::NoResources,
            9 => AemError::InProgress,
            10 => AemError::EntityMisbehaving,
            11 => AemError::NotSupported,
            12 => AemError::StreamIsRunning,
            _ => AemError::InternalError,
        })
    }
}

/// An AECP AEM PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aecpdu {
    /// Command or response
    pub message_type: AecpMessageType,
    /// Status field (meaningful on responses)
    pub status: AemStatusCode,
    /// Entity the command is addressed to
    pub target_entity_id: UniqueIdentifier,
    /// Controller that issued the command
    pub controller_entity_id: UniqueIdentifier,
    /// Sequence id matching commands to responses
    pub sequence_id: u16,
    /// Unsolicited-response flag (u bit)
    pub unsolicited: bool,
    /// AEM command code
    pub command_type: AemCommandType,
    /// Command- or response-specific payload
    pub payload: Bytes,
}

impl Aecpdu {
    /// Build a command PDU
    #[must_use]
    pub fn command(
        target_entity_id: UniqueIdentifier,
        controller_entity_id: UniqueIdentifier,
        sequence_id: u16,
        command_type: AemCommandType,
        payload: Bytes,
    ) -> Self {
        Self {
            message_type: AecpMessageType::AemCommand,
            status: AemStatusCode::SUCCESS,
            target_entity_id,
            controller_entity_id,
            sequence_id,
            unsolicited: false,
            command_type,
            payload,
        }
    }

    /// Encode to the full PDU (control header + payload)
    #[must_use]
    pub fn encode(&self) -> Bytes {
        // control_data_length counts everything after the target entity id
        let cdl = (10 + 2 + self.payload.len()) as u16;
        let mut buf = BytesMut::with_capacity(ControlHeader::LEN + usize::from(cdl));
        ControlHeader {
            subtype: SUBTYPE_AECP,
            message_type: self.message_type as u8,
            status: self.status.0,
            control_data_length: cdl,
            stream_id: self.target_entity_id.value(),
        }
        .encode(&mut buf);
        buf.put_u64(self.controller_entity_id.value());
        buf.put_u16(self.sequence_id);
        let u_bit = if self.unsolicited { 0x8000 } else { 0 };
        buf.put_u16(u_bit | self.command_type as u16);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode the payload following an already-parsed control header
    #[must_use]
    pub fn decode(header: &ControlHeader, buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 12 {
            return None;
        }
        let message_type = AecpMessageType::from_wire(header.message_type)?;
        let controller_entity_id = UniqueIdentifier::new(buf.get_u64());
        let sequence_id = buf.get_u16();
        let raw_type = buf.get_u16();
        let command_type = AemCommandType::from_wire(raw_type)?;
        let payload = buf.copy_to_bytes(buf.remaining());

        Some(Self {
            message_type,
            status: AemStatusCode(header.status),
            target_entity_id: UniqueIdentifier::new(header.stream_id),
            controller_entity_id,
            sequence_id,
            unsolicited: raw_type & 0x8000 != 0,
            command_type,
            payload,
        })
    }
}
