//! A minimal simulated AVDECC entity.
//!
//! Implements just enough of the responder side to drive the controller
//! through discovery, enumeration and control: a model with one
//! configuration holding one audio unit, one stream input, one stream
//! output, one clock domain and one clock source. Behavior overrides let
//! tests drop responses or force error statuses per command.

use crate::model::{
    AudioUnitDescriptor, ClockDomainDescriptor, ClockSourceDescriptor, ConfigurationDescriptor,
    DescriptorType, EntityDescriptor, Identity, StreamDescriptor,
};
use crate::protocol::{
    self, aem, AcmpMessageType, AcmpStatusCode, Acmpdu, AecpMessageType, AemCommandType,
    AemStatusCode, Aecpdu, Pdu,
};
use crate::types::{
    AvdeccFixedString, EntityCapabilities, MacAddress, SamplingRate, StreamFormat,
    StreamIdentification, UniqueIdentifier,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

/// Stream format the simulated streams use
pub const SIM_STREAM_FORMAT: StreamFormat = StreamFormat(0x00A0_0204_6000_0800);

/// Configuration of a simulated entity
#[derive(Debug, Clone)]
pub struct EntitySimConfig {
    /// Entity id the simulator advertises
    pub entity_id: UniqueIdentifier,
    /// Source MAC of the simulator
    pub mac: MacAddress,
    /// Advertised valid time in seconds
    pub valid_time: u8,
    /// Drop the first N responses per AEM command type
    pub drop_responses: HashMap<AemCommandType, usize>,
    /// Force an AEM status per command type
    pub aem_status: HashMap<AemCommandType, AemStatusCode>,
    /// Force an ACMP status per command type
    pub acmp_status: HashMap<AcmpMessageType, AcmpStatusCode>,
    /// Respond to ACQUIRE with ENTITY_ACQUIRED and this owner
    pub acquired_by: Option<UniqueIdentifier>,
    /// Talker GET_RX_STATE reports as connected
    pub connected_talker: Option<StreamIdentification>,
}

impl EntitySimConfig {
    /// A well-behaved entity with the given id
    #[must_use]
    pub fn new(entity_id: UniqueIdentifier) -> Self {
        Self {
            entity_id,
            mac: MacAddress::new([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]),
            valid_time: 31,
            drop_responses: HashMap::new(),
            aem_status: HashMap::new(),
            acmp_status: HashMap::new(),
            acquired_by: None,
            connected_talker: None,
        }
    }
}

/// The simulated entity state machine
pub struct EntitySim {
    config: EntitySimConfig,
    entity_descriptor: EntityDescriptor,
    configuration: ConfigurationDescriptor,
    audio_unit: AudioUnitDescriptor,
    stream_input: StreamDescriptor,
    stream_output: StreamDescriptor,
    clock_source: ClockSourceDescriptor,
    clock_domain: ClockDomainDescriptor,
    names: HashMap<(u16, u16), AvdeccFixedString>,
    available_index: u32,
    /// Commands received, per AEM command type (retransmissions included)
    pub command_counts: HashMap<AemCommandType, usize>,
}

impl EntitySim {
    /// Build the simulator with its minimal one-configuration model
    #[must_use]
    pub fn new(config: EntitySimConfig) -> Self {
        let identity = Identity {
            entity_id: config.entity_id,
            entity_model_id: UniqueIdentifier::new(0x0011_2233_0000_0042),
            entity_capabilities: EntityCapabilities(EntityCapabilities::AEM_SUPPORTED),
            talker_stream_sources: 1,
            talker_capabilities: 0x4001,
            listener_stream_sinks: 1,
            listener_capabilities: 0x4001,
            controller_capabilities: 0,
            available_index: 1,
        };
        let entity_descriptor = EntityDescriptor {
            identity,
            association_id: UniqueIdentifier::NULL,
            entity_name: "Sim Entity".into(),
            vendor_name_string: 0,
            model_name_string: 1,
            firmware_version: "1.0.0".into(),
            group_name: AvdeccFixedString::default(),
            serial_number: "SIM-0001".into(),
            configurations_count: 1,
            current_configuration: 0,
        };

        let mut configuration = ConfigurationDescriptor {
            object_name: "Default".into(),
            localized_description: 0xFFFF,
            descriptor_counts: Default::default(),
        };
        for (descriptor_type, count) in [
            (DescriptorType::AudioUnit, 1u16),
            (DescriptorType::StreamInput, 1),
            (DescriptorType::StreamOutput, 1),
            (DescriptorType::ClockSource, 1),
            (DescriptorType::ClockDomain, 1),
        ] {
            configuration
                .descriptor_counts
                .insert(descriptor_type as u16, count);
        }

        let audio_unit = AudioUnitDescriptor {
            object_name: "Audio Unit".into(),
            localized_description: 0xFFFF,
            clock_domain_index: 0,
            current_sampling_rate: SamplingRate::from_hz(48_000),
            sampling_rates: vec![SamplingRate::from_hz(48_000), SamplingRate::from_hz(96_000)],
            ..AudioUnitDescriptor::default()
        };
        let stream_input = StreamDescriptor {
            object_name: "Input 0".into(),
            localized_description: 0xFFFF,
            current_format: SIM_STREAM_FORMAT,
            formats: vec![SIM_STREAM_FORMAT],
            ..StreamDescriptor::default()
        };
        let stream_output = StreamDescriptor {
            object_name: "Output 0".into(),
            localized_description: 0xFFFF,
            current_format: SIM_STREAM_FORMAT,
            formats: vec![SIM_STREAM_FORMAT],
            ..StreamDescriptor::default()
        };
        let clock_source = ClockSourceDescriptor {
            object_name: "Internal".into(),
            localized_description: 0xFFFF,
            ..ClockSourceDescriptor::default()
        };
        let clock_domain = ClockDomainDescriptor {
            object_name: "Domain 0".into(),
            localized_description: 0xFFFF,
            clock_source_index: 0,
            clock_sources: vec![0],
        };

        Self {
            config,
            entity_descriptor,
            configuration,
            audio_unit,
            stream_input,
            stream_output,
            clock_source,
            clock_domain,
            names: HashMap::new(),
            available_index: 1,
            command_counts: HashMap::new(),
        }
    }

    /// Access the behavior configuration
    pub fn config_mut(&mut self) -> &mut EntitySimConfig {
        &mut self.config
    }

    /// An ENTITY_AVAILABLE frame for this entity
    #[must_use]
    pub fn advertisement(&self) -> Bytes {
        self.advertisement_with_index(self.available_index)
    }

    /// An ENTITY_AVAILABLE frame with an explicit available index
    #[must_use]
    pub fn advertisement_with_index(&self, available_index: u32) -> Bytes {
        let identity = &self.entity_descriptor.identity;
        let pdu = protocol::Adpdu {
            message_type: protocol::AdpMessageType::EntityAvailable,
            valid_time: self.config.valid_time,
            entity_id: self.config.entity_id,
            entity_model_id: identity.entity_model_id,
            entity_capabilities: identity.entity_capabilities,
            talker_stream_sources: identity.talker_stream_sources,
            talker_capabilities: identity.talker_capabilities,
            listener_stream_sinks: identity.listener_stream_sinks,
            listener_capabilities: identity.listener_capabilities,
            available_index,
            ..protocol::Adpdu::discover()
        };
        protocol::ethernet_frame(
            MacAddress::IDENTIFICATION_MULTICAST,
            self.config.mac,
            &pdu.encode(),
        )
    }

    /// An ENTITY_DEPARTING frame for this entity
    #[must_use]
    pub fn departing(&self) -> Bytes {
        let pdu = protocol::Adpdu {
            message_type: protocol::AdpMessageType::EntityDeparting,
            entity_id: self.config.entity_id,
            ..protocol::Adpdu::discover()
        };
        protocol::ethernet_frame(
            MacAddress::IDENTIFICATION_MULTICAST,
            self.config.mac,
            &pdu.encode(),
        )
    }

    /// React to one frame from the controller
    pub fn handle(&mut self, frame: &[u8]) -> Vec<Bytes> {
        let Some(received) = protocol::parse_frame(frame) else {
            return Vec::new();
        };
        match received.pdu {
            Pdu::Aecp(pdu) => self.handle_aecp(&pdu),
            Pdu::Acmp(pdu) => self.handle_acmp(&pdu),
            Pdu::Adp(_) => Vec::new(),
        }
    }

    fn handle_aecp(&mut self, command: &Aecpdu) -> Vec<Bytes> {
        if command.message_type != AecpMessageType::AemCommand
            || command.target_entity_id != self.config.entity_id
        {
            return Vec::new();
        }
        *self.command_counts.entry(command.command_type).or_insert(0) += 1;

        if let Some(drops) = self.config.drop_responses.get_mut(&command.command_type) {
            if *drops > 0 {
                *drops -= 1;
                return Vec::new();
            }
        }

        if let Some(&status) = self.config.aem_status.get(&command.command_type) {
            return vec![self.aem_response(command, status, command.payload.clone())];
        }

        match command.command_type {
            AemCommandType::ReadDescriptor => self.read_descriptor(command),
            AemCommandType::AcquireEntity => self.acquire(command),
            AemCommandType::GetConfiguration => {
                let mut payload = BytesMut::new();
                payload.put_u16(0); // reserved
                payload.put_u16(self.entity_descriptor.current_configuration);
                vec![self.aem_response(command, AemStatusCode::SUCCESS, payload.freeze())]
            }
            AemCommandType::GetStreamFormat => {
                let mut request = &command.payload[..];
                if request.remaining() < 4 {
                    return self.protocol_error(command);
                }
                let descriptor_type = request.get_u16();
                let index = request.get_u16();
                let format = if descriptor_type == DescriptorType::StreamInput as u16 {
                    self.stream_input.current_format
                } else {
                    self.stream_output.current_format
                };
                vec![self.aem_response(
                    command,
                    AemStatusCode::SUCCESS,
                    aem::stream_format(descriptor_type, index, format),
                )]
            }
            AemCommandType::SetStreamFormat
            | AemCommandType::SetConfiguration
            | AemCommandType::SetSamplingRate
            | AemCommandType::SetClockSource
            | AemCommandType::SetMemoryObjectLength
            | AemCommandType::StartStreaming
            | AemCommandType::StopStreaming
            | AemCommandType::AddAudioMappings
            | AemCommandType::RemoveAudioMappings => {
                vec![self.aem_response(command, AemStatusCode::SUCCESS, command.payload.clone())]
            }
            AemCommandType::SetName => {
                let mut request = &command.payload[..];
                if request.remaining() < 8 + AvdeccFixedString::CAPACITY {
                    return self.protocol_error(command);
                }
                let descriptor_type = request.get_u16();
                let descriptor_index = request.get_u16();
                let name_index = request.get_u16();
                let _configuration = request.get_u16();
                let mut raw = [0u8; AvdeccFixedString::CAPACITY];
                request.copy_to_slice(&mut raw);
                let name = AvdeccFixedString::from_buffer(&raw);
                self.names
                    .insert((descriptor_type, descriptor_index | (name_index << 15)), name);
                vec![self.aem_response(command, AemStatusCode::SUCCESS, command.payload.clone())]
            }
            AemCommandType::GetName => {
                let mut request = &command.payload[..];
                if request.remaining() < 8 {
                    return self.protocol_error(command);
                }
                let descriptor_type = request.get_u16();
                let descriptor_index = request.get_u16();
                let name_index = request.get_u16();
                let configuration_index = request.get_u16();
                let name = self.lookup_name(descriptor_type, descriptor_index, name_index);
                vec![self.aem_response(
                    command,
                    AemStatusCode::SUCCESS,
                    aem::name(
                        descriptor_type,
                        descriptor_index,
                        name_index,
                        configuration_index,
                        &name,
                    ),
                )]
            }
            AemCommandType::GetSamplingRate => {
                let mut request = &command.payload[..];
                if request.remaining() < 4 {
                    return self.protocol_error(command);
                }
                let descriptor_type = request.get_u16();
                let index = request.get_u16();
                vec![self.aem_response(
                    command,
                    AemStatusCode::SUCCESS,
                    aem::sampling_rate(
                        descriptor_type,
                        index,
                        self.audio_unit.current_sampling_rate,
                    ),
                )]
            }
            AemCommandType::GetClockSource => {
                let mut request = &command.payload[..];
                if request.remaining() < 4 {
                    return self.protocol_error(command);
                }
                let descriptor_type = request.get_u16();
                let index = request.get_u16();
                vec![self.aem_response(
                    command,
                    AemStatusCode::SUCCESS,
                    aem::clock_source(descriptor_type, index, self.clock_domain.clock_source_index),
                )]
            }
            AemCommandType::GetAudioMap | AemCommandType::GetMemoryObjectLength => {
                vec![self.aem_response(command, AemStatusCode::NO_SUCH_DESCRIPTOR, Bytes::new())]
            }
            _ => vec![self.aem_response(command, AemStatusCode::NOT_IMPLEMENTED, Bytes::new())],
        }
    }

    fn lookup_name(&self, descriptor_type: u16, index: u16, name_index: u16) -> AvdeccFixedString {
        if let Some(name) = self.names.get(&(descriptor_type, index | (name_index << 15))) {
            return *name;
        }
        if descriptor_type == DescriptorType::Entity as u16 {
            return if name_index == 0 {
                self.entity_descriptor.entity_name
            } else {
                self.entity_descriptor.group_name
            };
        }
        match DescriptorType::from_wire(descriptor_type) {
            Some(DescriptorType::Configuration) => self.configuration.object_name,
            Some(DescriptorType::AudioUnit) => self.audio_unit.object_name,
            Some(DescriptorType::StreamInput) => self.stream_input.object_name,
            Some(DescriptorType::StreamOutput) => self.stream_output.object_name,
            Some(DescriptorType::ClockSource) => self.clock_source.object_name,
            Some(DescriptorType::ClockDomain) => self.clock_domain.object_name,
            _ => AvdeccFixedString::default(),
        }
    }

    fn read_descriptor(&mut self, command: &Aecpdu) -> Vec<Bytes> {
        let mut request = &command.payload[..];
        if request.remaining() < 8 {
            return self.protocol_error(command);
        }
        let configuration_index = request.get_u16();
        request.advance(2);
        let descriptor_type = request.get_u16();
        let descriptor_index = request.get_u16();

        let mut body = BytesMut::new();
        body.put_u16(configuration_index);
        body.put_u16(0); // reserved
        body.put_u16(descriptor_type);
        body.put_u16(descriptor_index);

        let known = match (DescriptorType::from_wire(descriptor_type), descriptor_index) {
            (Some(DescriptorType::Entity), 0) => {
                aem::encode_entity(&mut body, &self.entity_descriptor);
                true
            }
            (Some(DescriptorType::Configuration), 0) => {
                aem::encode_configuration(&mut body, &self.configuration);
                true
            }
            (Some(DescriptorType::AudioUnit), 0) => {
                aem::encode_audio_unit(&mut body, &self.audio_unit);
                true
            }
            (Some(DescriptorType::StreamInput), 0) => {
                aem::encode_stream(&mut body, &self.stream_input);
                true
            }
            (Some(DescriptorType::StreamOutput), 0) => {
                aem::encode_stream(&mut body, &self.stream_output);
                true
            }
            (Some(DescriptorType::ClockSource), 0) => {
                aem::encode_clock_source(&mut body, &self.clock_source);
                true
            }
            (Some(DescriptorType::ClockDomain), 0) => {
                aem::encode_clock_domain(&mut body, &self.clock_domain);
                true
            }
            _ => false,
        };

        if known {
            vec![self.aem_response(command, AemStatusCode::SUCCESS, body.freeze())]
        } else {
            vec![self.aem_response(command, AemStatusCode::NO_SUCH_DESCRIPTOR, Bytes::new())]
        }
    }

    fn acquire(&mut self, command: &Aecpdu) -> Vec<Bytes> {
        let mut request = &command.payload[..];
        if request.remaining() < 16 {
            return self.protocol_error(command);
        }
        let flags = request.get_u32();
        request.advance(8);
        let descriptor_type = request.get_u16();
        let descriptor_index = request.get_u16();

        let (status, owner) = if flags & aem::ACQUIRE_FLAG_RELEASE != 0 {
            (AemStatusCode::SUCCESS, UniqueIdentifier::NULL)
        } else if let Some(owner) = self.config.acquired_by {
            (AemStatusCode::ENTITY_ACQUIRED, owner)
        } else {
            (AemStatusCode::SUCCESS, command.controller_entity_id)
        };

        let mut payload = BytesMut::new();
        payload.put_u32(flags & !aem::ACQUIRE_FLAG_RELEASE);
        payload.put_u64(owner.value());
        payload.put_u16(descriptor_type);
        payload.put_u16(descriptor_index);
        vec![self.aem_response(command, status, payload.freeze())]
    }

    fn handle_acmp(&mut self, command: &Acmpdu) -> Vec<Bytes> {
        if command.message_type.is_response() {
            return Vec::new();
        }
        let is_for_us = match command.message_type {
            AcmpMessageType::DisconnectTxCommand
            | AcmpMessageType::GetTxStateCommand
            | AcmpMessageType::GetTxConnectionCommand
            | AcmpMessageType::ConnectTxCommand => {
                command.talker_entity_id == self.config.entity_id
            }
            _ => command.listener_entity_id == self.config.entity_id,
        };
        if !is_for_us {
            return Vec::new();
        }

        let Some(response_type) = command.message_type.response_type() else {
            return Vec::new();
        };
        let status = self
            .config
            .acmp_status
            .get(&command.message_type)
            .copied()
            .unwrap_or(AcmpStatusCode::SUCCESS);

        let mut response = command.clone();
        response.message_type = response_type;
        response.status = status;

        if response_type == AcmpMessageType::GetRxStateResponse && status.is_success() {
            match self.config.connected_talker {
                Some(talker) => {
                    response.talker_entity_id = talker.entity_id;
                    response.talker_unique_id = talker.stream_index;
                    response.connection_count = 1;
                }
                None => {
                    response.talker_entity_id = UniqueIdentifier::NULL;
                    response.talker_unique_id = 0;
                    response.connection_count = 0;
                }
            }
        }

        vec![protocol::ethernet_frame(
            MacAddress::IDENTIFICATION_MULTICAST,
            self.config.mac,
            &response.encode(),
        )]
    }

    fn aem_response(&self, command: &Aecpdu, status: AemStatusCode, payload: Bytes) -> Bytes {
        let mut response = command.clone();
        response.message_type = AecpMessageType::AemResponse;
        response.status = status;
        response.payload = payload;
        protocol::ethernet_frame(
            // back to whoever asked; the controller filters on its id
            MacAddress::IDENTIFICATION_MULTICAST,
            self.config.mac,
            &response.encode(),
        )
    }

    fn protocol_error(&self, command: &Aecpdu) -> Vec<Bytes> {
        vec![self.aem_response(command, AemStatusCode::BAD_ARGUMENTS, Bytes::new())]
    }
}
