//! AEM command payload encoding and response payload decoding.
//!
//! Layouts follow IEEE 1722.1-2013 clause 7.4 (commands) and 7.2
//! (descriptors). All fields are big-endian. Decoders return `None` on
//! truncated input; the caller maps that to `ProtocolError`.

use crate::model::{
    AudioClusterDescriptor, AudioMapDescriptor, AudioUnitDescriptor, AvbInterfaceDescriptor,
    ClockDomainDescriptor, ClockSourceDescriptor, ConfigurationDescriptor, DescriptorType,
    EntityDescriptor, Identity, JackDescriptor, LocaleDescriptor, MemoryObjectDescriptor,
    StreamDescriptor, StreamPortDescriptor, StringsDescriptor,
};
use crate::types::{
    AudioMapping, AvdeccFixedString, ConfigurationIndex, DescriptorIndex, EntityCapabilities,
    MacAddress, SamplingRate, StreamFormat, UniqueIdentifier,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

/// ACQUIRE_ENTITY flag: keep the acquisition across controller restarts
pub const ACQUIRE_FLAG_PERSISTENT: u32 = 0x0000_0001;
/// ACQUIRE_ENTITY flag: release instead of acquire
pub const ACQUIRE_FLAG_RELEASE: u32 = 0x8000_0000;

fn get_fixed_string(buf: &mut impl Buf) -> Option<AvdeccFixedString> {
    if buf.remaining() < AvdeccFixedString::CAPACITY {
        return None;
    }
    let mut raw = [0u8; AvdeccFixedString::CAPACITY];
    buf.copy_to_slice(&mut raw);
    Some(AvdeccFixedString::from_buffer(&raw))
}

/// ACQUIRE_ENTITY command payload
#[must_use]
pub fn acquire_entity(flags: u32, descriptor_type: u16, descriptor_index: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_u32(flags);
    buf.put_u64(0); // owner_id, filled by the entity on response
    buf.put_u16(descriptor_type);
    buf.put_u16(descriptor_index);
    buf.freeze()
}

/// Owner id from an ACQUIRE_ENTITY response
#[must_use]
pub fn decode_acquire_response(mut payload: &[u8]) -> Option<UniqueIdentifier> {
    if payload.remaining() < 12 {
        return None;
    }
    payload.advance(4); // flags
    Some(UniqueIdentifier::new(payload.get_u64()))
}

/// READ_DESCRIPTOR command payload
#[must_use]
pub fn read_descriptor(
    configuration_index: ConfigurationIndex,
    descriptor_type: u16,
    descriptor_index: u16,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u16(configuration_index);
    buf.put_u16(0); // reserved
    buf.put_u16(descriptor_type);
    buf.put_u16(descriptor_index);
    buf.freeze()
}

/// SET_CONFIGURATION command payload
#[must_use]
pub fn set_configuration(configuration_index: ConfigurationIndex) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u16(0); // reserved
    buf.put_u16(configuration_index);
    buf.freeze()
}

/// Configuration index from a SET/GET_CONFIGURATION response
#[must_use]
pub fn decode_configuration_response(mut payload: &[u8]) -> Option<ConfigurationIndex> {
    if payload.remaining() < 4 {
        return None;
    }
    payload.advance(2); // reserved
    Some(payload.get_u16())
}

/// SET/GET_STREAM_FORMAT command payload (format zero on GET)
#[must_use]
pub fn stream_format(descriptor_type: u16, descriptor_index: u16, format: StreamFormat) -> Bytes {
    let mut buf = BytesMut::with_capacity(12);
    buf.put_u16(descriptor_type);
    buf.put_u16(descriptor_index);
    buf.put_u64(format.0);
    buf.freeze()
}

/// Stream format from a SET/GET_STREAM_FORMAT response
#[must_use]
pub fn decode_stream_format_response(mut payload: &[u8]) -> Option<StreamFormat> {
    if payload.remaining() < 12 {
        return None;
    }
    payload.advance(4);
    Some(StreamFormat(payload.get_u64()))
}

/// SET_NAME / GET_NAME command payload (name all-zero on GET)
#[must_use]
pub fn name(
    descriptor_type: u16,
    descriptor_index: u16,
    name_index: u16,
    configuration_index: ConfigurationIndex,
    value: &AvdeccFixedString,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + AvdeccFixedString::CAPACITY);
    buf.put_u16(descriptor_type);
    buf.put_u16(descriptor_index);
    buf.put_u16(name_index);
    buf.put_u16(configuration_index);
    buf.put_slice(value.as_buffer());
    buf.freeze()
}

/// Name from a SET/GET_NAME response
#[must_use]
pub fn decode_name_response(mut payload: &[u8]) -> Option<AvdeccFixedString> {
    if payload.remaining() < 8 + AvdeccFixedString::CAPACITY {
        return None;
    }
    payload.advance(8);
    get_fixed_string(&mut payload)
}

/// SET/GET_SAMPLING_RATE command payload (rate zero on GET)
#[must_use]
pub fn sampling_rate(descriptor_type: u16, descriptor_index: u16, rate: SamplingRate) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u16(descriptor_type);
    buf.put_u16(descriptor_index);
    buf.put_u32(rate.0);
    buf.freeze()
}

/// Sampling rate from a SET/GET_SAMPLING_RATE response
#[must_use]
pub fn decode_sampling_rate_response(mut payload: &[u8]) -> Option<SamplingRate> {
    if payload.remaining() < 8 {
        return None;
    }
    payload.advance(4);
    Some(SamplingRate(payload.get_u32()))
}

/// SET/GET_CLOCK_SOURCE command payload (index zero on GET)
#[must_use]
pub fn clock_source(descriptor_type: u16, descriptor_index: u16, source_index: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u16(descriptor_type);
    buf.put_u16(descriptor_index);
    buf.put_u16(source_index);
    buf.put_u16(0); // reserved
    buf.freeze()
}

/// Clock source index from a SET/GET_CLOCK_SOURCE response
#[must_use]
pub fn decode_clock_source_response(mut payload: &[u8]) -> Option<u16> {
    if payload.remaining() < 6 {
        return None;
    }
    payload.advance(4);
    Some(payload.get_u16())
}

/// START_STREAMING / STOP_STREAMING command payload
#[must_use]
pub fn streaming(descriptor_type: u16, descriptor_index: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u16(descriptor_type);
    buf.put_u16(descriptor_index);
    buf.freeze()
}

/// GET_AUDIO_MAP command payload
#[must_use]
pub fn get_audio_map(descriptor_type: u16, descriptor_index: u16, map_index: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u16(descriptor_type);
    buf.put_u16(descriptor_index);
    buf.put_u16(map_index);
    buf.put_u16(0); // reserved
    buf.freeze()
}

/// Decoded GET_AUDIO_MAP response page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioMapPage {
    /// Page index
    pub map_index: u16,
    /// Total number of pages the entity reports
    pub number_of_maps: u16,
    /// Mappings in this page
    pub mappings: Vec<AudioMapping>,
}

/// Parse a GET_AUDIO_MAP response payload
#[must_use]
pub fn decode_audio_map_response(mut payload: &[u8]) -> Option<AudioMapPage> {
    if payload.remaining() < 12 {
        return None;
    }
    payload.advance(4); // descriptor_type + descriptor_index
    let map_index = payload.get_u16();
    let number_of_maps = payload.get_u16();
    let number_of_mappings = payload.get_u16();
    payload.advance(2); // reserved
    let mappings = decode_mappings(&mut payload, number_of_mappings)?;
    Some(AudioMapPage {
        map_index,
        number_of_maps,
        mappings,
    })
}

/// ADD/REMOVE_AUDIO_MAPPINGS command payload
#[must_use]
pub fn audio_mappings(descriptor_type: u16, descriptor_index: u16, maps: &[AudioMapping]) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + maps.len() * 8);
    buf.put_u16(descriptor_type);
    buf.put_u16(descriptor_index);
    buf.put_u16(maps.len() as u16);
    buf.put_u16(0); // reserved
    for m in maps {
        buf.put_u16(m.stream_index);
        buf.put_u16(m.stream_channel);
        buf.put_u16(m.cluster_offset);
        buf.put_u16(m.cluster_channel);
    }
    buf.freeze()
}

fn decode_mappings(buf: &mut impl Buf, count: u16) -> Option<Vec<AudioMapping>> {
    if buf.remaining() < usize::from(count) * 8 {
        return None;
    }
    let mut mappings = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        mappings.push(AudioMapping {
            stream_index: buf.get_u16(),
            stream_channel: buf.get_u16(),
            cluster_offset: buf.get_u16(),
            cluster_channel: buf.get_u16(),
        });
    }
    Some(mappings)
}

/// SET/GET_MEMORY_OBJECT_LENGTH command payload (length zero on GET)
#[must_use]
pub fn memory_object_length(
    configuration_index: ConfigurationIndex,
    memory_object_index: u16,
    length: u64,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(12);
    buf.put_u16(configuration_index);
    buf.put_u16(memory_object_index);
    buf.put_u64(length);
    buf.freeze()
}

/// Length from a SET/GET_MEMORY_OBJECT_LENGTH response
#[must_use]
pub fn decode_memory_object_length_response(mut payload: &[u8]) -> Option<u64> {
    if payload.remaining() < 12 {
        return None;
    }
    payload.advance(4);
    Some(payload.get_u64())
}

/// A descriptor parsed from a READ_DESCRIPTOR response
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    /// ENTITY
    Entity(EntityDescriptor),
    /// CONFIGURATION
    Configuration(ConfigurationDescriptor),
    /// AUDIO_UNIT
    AudioUnit(AudioUnitDescriptor),
    /// STREAM_INPUT or STREAM_OUTPUT
    Stream(StreamDescriptor),
    /// JACK_INPUT or JACK_OUTPUT
    Jack(JackDescriptor),
    /// AVB_INTERFACE
    AvbInterface(AvbInterfaceDescriptor),
    /// CLOCK_SOURCE
    ClockSource(ClockSourceDescriptor),
    /// MEMORY_OBJECT
    MemoryObject(MemoryObjectDescriptor),
    /// LOCALE
    Locale(LocaleDescriptor),
    /// STRINGS
    Strings(StringsDescriptor),
    /// STREAM_PORT_INPUT or STREAM_PORT_OUTPUT
    StreamPort(StreamPortDescriptor),
    /// AUDIO_CLUSTER
    AudioCluster(AudioClusterDescriptor),
    /// AUDIO_MAP
    AudioMap(AudioMapDescriptor),
    /// CLOCK_DOMAIN
    ClockDomain(ClockDomainDescriptor),
}

/// A READ_DESCRIPTOR response: configuration, type, index, descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct ReadDescriptorResponse {
    /// Configuration the descriptor was read from
    pub configuration_index: ConfigurationIndex,
    /// Descriptor type
    pub descriptor_type: DescriptorType,
    /// Descriptor index
    pub descriptor_index: DescriptorIndex,
    /// Parsed descriptor body
    pub descriptor: Descriptor,
}

/// Parse a READ_DESCRIPTOR response payload
#[must_use]
pub fn decode_read_descriptor_response(mut payload: &[u8]) -> Option<ReadDescriptorResponse> {
    if payload.remaining() < 8 {
        return None;
    }
    let configuration_index = payload.get_u16();
    payload.advance(2); // reserved
    let raw_type = payload.get_u16();
    let descriptor_index = payload.get_u16();
    let descriptor_type = DescriptorType::from_wire(raw_type)?;

    let descriptor = match descriptor_type {
        DescriptorType::Entity => Descriptor::Entity(decode_entity(&mut payload)?),
        DescriptorType::Configuration => {
            Descriptor::Configuration(decode_configuration(&mut payload)?)
        }
        DescriptorType::AudioUnit => Descriptor::AudioUnit(decode_audio_unit(&mut payload)?),
        DescriptorType::StreamInput | DescriptorType::StreamOutput => {
            Descriptor::Stream(decode_stream(&mut payload)?)
        }
        DescriptorType::JackInput | DescriptorType::JackOutput => {
            Descriptor::Jack(decode_jack(&mut payload)?)
        }
        DescriptorType::AvbInterface => {
            Descriptor::AvbInterface(decode_avb_interface(&mut payload)?)
        }
        DescriptorType::ClockSource => Descriptor::ClockSource(decode_clock_source(&mut payload)?),
        DescriptorType::MemoryObject => {
            Descriptor::MemoryObject(decode_memory_object(&mut payload)?)
        }
        DescriptorType::Locale => Descriptor::Locale(decode_locale(&mut payload)?),
        DescriptorType::Strings => Descriptor::Strings(decode_strings(&mut payload)?),
        DescriptorType::StreamPortInput | DescriptorType::StreamPortOutput => {
            Descriptor::StreamPort(decode_stream_port(&mut payload)?)
        }
        DescriptorType::AudioCluster => {
            Descriptor::AudioCluster(decode_audio_cluster(&mut payload)?)
        }
        DescriptorType::AudioMap => Descriptor::AudioMap(decode_audio_map_descriptor(&mut payload)?),
        DescriptorType::ClockDomain => Descriptor::ClockDomain(decode_clock_domain(&mut payload)?),
    };

    Some(ReadDescriptorResponse {
        configuration_index,
        descriptor_type,
        descriptor_index,
        descriptor,
    })
}

fn decode_entity(buf: &mut impl Buf) -> Option<EntityDescriptor> {
    // identity block + association id
    if buf.remaining() < 44 {
        return None;
    }
    let identity = Identity {
        entity_id: UniqueIdentifier::new(buf.get_u64()),
        entity_model_id: UniqueIdentifier::new(buf.get_u64()),
        entity_capabilities: EntityCapabilities(buf.get_u32()),
        talker_stream_sources: buf.get_u16(),
        talker_capabilities: buf.get_u16(),
        listener_stream_sinks: buf.get_u16(),
        listener_capabilities: buf.get_u16(),
        controller_capabilities: buf.get_u32(),
        available_index: buf.get_u32(),
    };
    let association_id = UniqueIdentifier::new(buf.get_u64());
    let entity_name = get_fixed_string(buf)?;
    if buf.remaining() < 4 {
        return None;
    }
    let vendor_name_string = buf.get_u16();
    let model_name_string = buf.get_u16();
    let firmware_version = get_fixed_string(buf)?;
    let group_name = get_fixed_string(buf)?;
    let serial_number = get_fixed_string(buf)?;
    if buf.remaining() < 4 {
        return None;
    }
    let configurations_count = buf.get_u16();
    let current_configuration = buf.get_u16();

    Some(EntityDescriptor {
        identity,
        association_id,
        entity_name,
        vendor_name_string,
        model_name_string,
        firmware_version,
        group_name,
        serial_number,
        configurations_count,
        current_configuration,
    })
}

/// Encode an ENTITY descriptor body (used by test doubles)
pub fn encode_entity(buf: &mut BytesMut, d: &EntityDescriptor) {
    buf.put_u64(d.identity.entity_id.value());
    buf.put_u64(d.identity.entity_model_id.value());
    buf.put_u32(d.identity.entity_capabilities.0);
    buf.put_u16(d.identity.talker_stream_sources);
    buf.put_u16(d.identity.talker_capabilities);
    buf.put_u16(d.identity.listener_stream_sinks);
    buf.put_u16(d.identity.listener_capabilities);
    buf.put_u32(d.identity.controller_capabilities);
    buf.put_u32(d.identity.available_index);
    buf.put_u64(d.association_id.value());
    buf.put_slice(d.entity_name.as_buffer());
    buf.put_u16(d.vendor_name_string);
    buf.put_u16(d.model_name_string);
    buf.put_slice(d.firmware_version.as_buffer());
    buf.put_slice(d.group_name.as_buffer());
    buf.put_slice(d.serial_number.as_buffer());
    buf.put_u16(d.configurations_count);
    buf.put_u16(d.current_configuration);
}

fn decode_configuration(buf: &mut impl Buf) -> Option<ConfigurationDescriptor> {
    let object_name = get_fixed_string(buf)?;
    if buf.remaining() < 6 {
        return None;
    }
    let localized_description = buf.get_u16();
    let descriptor_counts_count = buf.get_u16();
    let _descriptor_counts_offset = buf.get_u16();
    if buf.remaining() < usize::from(descriptor_counts_count) * 4 {
        return None;
    }
    let mut descriptor_counts = BTreeMap::new();
    for _ in 0..descriptor_counts_count {
        let descriptor_type = buf.get_u16();
        let count = buf.get_u16();
        descriptor_counts.insert(descriptor_type, count);
    }
    Some(ConfigurationDescriptor {
        object_name,
        localized_description,
        descriptor_counts,
    })
}

/// Encode a CONFIGURATION descriptor body (used by test doubles)
pub fn encode_configuration(buf: &mut BytesMut, d: &ConfigurationDescriptor) {
    buf.put_slice(d.object_name.as_buffer());
    buf.put_u16(d.localized_description);
    buf.put_u16(d.descriptor_counts.len() as u16);
    buf.put_u16(74); // descriptor_counts_offset, fixed by the layout
    for (&descriptor_type, &count) in &d.descriptor_counts {
        buf.put_u16(descriptor_type);
        buf.put_u16(count);
    }
}

fn decode_audio_unit(buf: &mut impl Buf) -> Option<AudioUnitDescriptor> {
    let object_name = get_fixed_string(buf)?;
    // localized_description + clock_domain + 34 count/base pairs and the
    // sampling rate block header
    if buf.remaining() < 2 + 2 + 68 + 8 {
        return None;
    }
    let localized_description = buf.get_u16();
    let clock_domain_index = buf.get_u16();
    let number_of_stream_input_ports = buf.get_u16();
    let base_stream_input_port = buf.get_u16();
    let number_of_stream_output_ports = buf.get_u16();
    let base_stream_output_port = buf.get_u16();
    // external/internal ports, controls, selectors, mixers, matrices,
    // splitters, combiners, demultiplexers, multiplexers, transcoders,
    // control blocks: 15 further (count, base) pairs
    buf.advance(60);
    let current_sampling_rate = SamplingRate(buf.get_u32());
    let _sampling_rates_offset = buf.get_u16();
    let sampling_rates_count = buf.get_u16();
    if buf.remaining() < usize::from(sampling_rates_count) * 4 {
        return None;
    }
    let mut sampling_rates = Vec::with_capacity(usize::from(sampling_rates_count));
    for _ in 0..sampling_rates_count {
        sampling_rates.push(SamplingRate(buf.get_u32()));
    }
    Some(AudioUnitDescriptor {
        object_name,
        localized_description,
        clock_domain_index,
        number_of_stream_input_ports,
        base_stream_input_port,
        number_of_stream_output_ports,
        base_stream_output_port,
        current_sampling_rate,
        sampling_rates,
    })
}

/// Encode an AUDIO_UNIT descriptor body (used by test doubles)
pub fn encode_audio_unit(buf: &mut BytesMut, d: &AudioUnitDescriptor) {
    buf.put_slice(d.object_name.as_buffer());
    buf.put_u16(d.localized_description);
    buf.put_u16(d.clock_domain_index);
    buf.put_u16(d.number_of_stream_input_ports);
    buf.put_u16(d.base_stream_input_port);
    buf.put_u16(d.number_of_stream_output_ports);
    buf.put_u16(d.base_stream_output_port);
    buf.put_bytes(0, 60); // remaining port/control count pairs
    buf.put_u32(d.current_sampling_rate.0);
    buf.put_u16(144); // sampling_rates_offset, fixed by the layout
    buf.put_u16(d.sampling_rates.len() as u16);
    for rate in &d.sampling_rates {
        buf.put_u32(rate.0);
    }
}

fn decode_stream(buf: &mut impl Buf) -> Option<StreamDescriptor> {
    let object_name = get_fixed_string(buf)?;
    if buf.remaining() < 2 + 2 + 2 + 8 + 2 + 2 + 8 * 3 + 2 * 3 + 2 + 2 + 4 {
        return None;
    }
    let localized_description = buf.get_u16();
    let clock_domain_index = buf.get_u16();
    let stream_flags = buf.get_u16();
    let current_format = StreamFormat(buf.get_u64());
    let _formats_offset = buf.get_u16();
    let number_of_formats = buf.get_u16();
    // backup talker entity ids / unique ids (3 pairs), backedup talker
    buf.advance(8 * 3 + 2 * 3);
    let avb_interface_index = buf.get_u16();
    let buffer_length = buf.get_u32();
    if buf.remaining() < usize::from(number_of_formats) * 8 {
        return None;
    }
    let mut formats = Vec::with_capacity(usize::from(number_of_formats));
    for _ in 0..number_of_formats {
        formats.push(StreamFormat(buf.get_u64()));
    }
    Some(StreamDescriptor {
        object_name,
        localized_description,
        clock_domain_index,
        stream_flags,
        current_format,
        avb_interface_index,
        buffer_length,
        formats,
    })
}

/// Encode a STREAM descriptor body (used by test doubles)
pub fn encode_stream(buf: &mut BytesMut, d: &StreamDescriptor) {
    buf.put_slice(d.object_name.as_buffer());
    buf.put_u16(d.localized_description);
    buf.put_u16(d.clock_domain_index);
    buf.put_u16(d.stream_flags);
    buf.put_u64(d.current_format.0);
    buf.put_u16(132); // formats_offset, fixed by the layout
    buf.put_u16(d.formats.len() as u16);
    buf.put_bytes(0, 8 * 3 + 2 * 3); // backup talker fields
    buf.put_u16(d.avb_interface_index);
    buf.put_u32(d.buffer_length);
    for format in &d.formats {
        buf.put_u64(format.0);
    }
}

fn decode_jack(buf: &mut impl Buf) -> Option<JackDescriptor> {
    let object_name = get_fixed_string(buf)?;
    if buf.remaining() < 6 {
        return None;
    }
    Some(JackDescriptor {
        object_name,
        localized_description: buf.get_u16(),
        jack_flags: buf.get_u16(),
        jack_type: buf.get_u16(),
    })
}

fn decode_avb_interface(buf: &mut impl Buf) -> Option<AvbInterfaceDescriptor> {
    let object_name = get_fixed_string(buf)?;
    if buf.remaining() < 2 + 6 + 2 + 8 + 3 {
        return None;
    }
    let localized_description = buf.get_u16();
    let mut mac = [0u8; 6];
    buf.copy_to_slice(&mut mac);
    let interface_flags = buf.get_u16();
    let clock_identity = UniqueIdentifier::new(buf.get_u64());
    let priority1 = buf.get_u8();
    let clock_class = buf.get_u8();
    // offset_scaled_log_variance, clock_accuracy, priority2 and the gPTP
    // timing fields are not tracked by the controller
    let domain_number = if buf.remaining() >= 5 {
        buf.advance(4);
        buf.get_u8()
    } else {
        0
    };
    Some(AvbInterfaceDescriptor {
        object_name,
        localized_description,
        mac_address: MacAddress::new(mac),
        interface_flags,
        clock_identity,
        priority1,
        clock_class,
        domain_number,
    })
}

/// Encode an AVB_INTERFACE descriptor body (used by test doubles)
pub fn encode_avb_interface(buf: &mut BytesMut, d: &AvbInterfaceDescriptor) {
    buf.put_slice(d.object_name.as_buffer());
    buf.put_u16(d.localized_description);
    buf.put_slice(d.mac_address.as_bytes());
    buf.put_u16(d.interface_flags);
    buf.put_u64(d.clock_identity.value());
    buf.put_u8(d.priority1);
    buf.put_u8(d.clock_class);
    buf.put_u16(0); // offset_scaled_log_variance
    buf.put_u8(0); // clock_accuracy
    buf.put_u8(0); // priority2
    buf.put_u8(d.domain_number);
}

fn decode_clock_source(buf: &mut impl Buf) -> Option<ClockSourceDescriptor> {
    let object_name = get_fixed_string(buf)?;
    if buf.remaining() < 2 + 2 + 2 + 8 + 2 + 2 {
        return None;
    }
    Some(ClockSourceDescriptor {
        object_name,
        localized_description: buf.get_u16(),
        clock_source_flags: buf.get_u16(),
        clock_source_type: buf.get_u16(),
        clock_source_identifier: UniqueIdentifier::new(buf.get_u64()),
        clock_source_location_type: buf.get_u16(),
        clock_source_location_index: buf.get_u16(),
    })
}

/// Encode a CLOCK_SOURCE descriptor body (used by test doubles)
pub fn encode_clock_source(buf: &mut BytesMut, d: &ClockSourceDescriptor) {
    buf.put_slice(d.object_name.as_buffer());
    buf.put_u16(d.localized_description);
    buf.put_u16(d.clock_source_flags);
    buf.put_u16(d.clock_source_type);
    buf.put_u64(d.clock_source_identifier.value());
    buf.put_u16(d.clock_source_location_type);
    buf.put_u16(d.clock_source_location_index);
}

fn decode_memory_object(buf: &mut impl Buf) -> Option<MemoryObjectDescriptor> {
    let object_name = get_fixed_string(buf)?;
    if buf.remaining() < 2 + 2 + 2 + 2 + 8 + 8 + 8 {
        return None;
    }
    let localized_description = buf.get_u16();
    let memory_object_type = buf.get_u16();
    let target_descriptor_type = buf.get_u16();
    let target_descriptor_index = buf.get_u16();
    Some(MemoryObjectDescriptor {
        object_name,
        localized_description,
        memory_object_type,
        target_descriptor_type,
        target_descriptor_index,
        start_address: buf.get_u64(),
        maximum_length: buf.get_u64(),
        length: buf.get_u64(),
    })
}

fn decode_locale(buf: &mut impl Buf) -> Option<LocaleDescriptor> {
    let locale_id = get_fixed_string(buf)?;
    if buf.remaining() < 4 {
        return None;
    }
    Some(LocaleDescriptor {
        locale_id,
        number_of_string_descriptors: buf.get_u16(),
        base_string_descriptor_index: buf.get_u16(),
    })
}

fn decode_strings(buf: &mut impl Buf) -> Option<StringsDescriptor> {
    let mut strings = Vec::with_capacity(7);
    for _ in 0..7 {
        strings.push(get_fixed_string(buf)?);
    }
    Some(StringsDescriptor { strings })
}

fn decode_stream_port(buf: &mut impl Buf) -> Option<StreamPortDescriptor> {
    if buf.remaining() < 16 {
        return None;
    }
    Some(StreamPortDescriptor {
        clock_domain_index: buf.get_u16(),
        port_flags: buf.get_u16(),
        number_of_controls: buf.get_u16(),
        base_control: buf.get_u16(),
        number_of_clusters: buf.get_u16(),
        base_cluster: buf.get_u16(),
        number_of_maps: buf.get_u16(),
        base_map: buf.get_u16(),
    })
}

/// Encode a STREAM_PORT descriptor body (used by test doubles)
pub fn encode_stream_port(buf: &mut BytesMut, d: &StreamPortDescriptor) {
    buf.put_u16(d.clock_domain_index);
    buf.put_u16(d.port_flags);
    buf.put_u16(d.number_of_controls);
    buf.put_u16(d.base_control);
    buf.put_u16(d.number_of_clusters);
    buf.put_u16(d.base_cluster);
    buf.put_u16(d.number_of_maps);
    buf.put_u16(d.base_map);
}

fn decode_audio_cluster(buf: &mut impl Buf) -> Option<AudioClusterDescriptor> {
    let object_name = get_fixed_string(buf)?;
    if buf.remaining() < 2 + 2 + 2 + 2 + 4 + 4 + 2 + 1 {
        return None;
    }
    Some(AudioClusterDescriptor {
        object_name,
        localized_description: buf.get_u16(),
        signal_type: buf.get_u16(),
        signal_index: buf.get_u16(),
        signal_output: buf.get_u16(),
        path_latency: buf.get_u32(),
        block_latency: buf.get_u32(),
        channel_count: buf.get_u16(),
        format: buf.get_u8(),
    })
}

fn decode_audio_map_descriptor(buf: &mut impl Buf) -> Option<AudioMapDescriptor> {
    if buf.remaining() < 4 {
        return None;
    }
    let _mappings_offset = buf.get_u16();
    let number_of_mappings = buf.get_u16();
    let mappings = decode_mappings(buf, number_of_mappings)?;
    Some(AudioMapDescriptor { mappings })
}

fn decode_clock_domain(buf: &mut impl Buf) -> Option<ClockDomainDescriptor> {
    let object_name = get_fixed_string(buf)?;
    if buf.remaining() < 8 {
        return None;
    }
    let localized_description = buf.get_u16();
    let clock_source_index = buf.get_u16();
    let _clock_sources_offset = buf.get_u16();
    let clock_sources_count = buf.get_u16();
    if buf.remaining() < usize::from(clock_sources_count) * 2 {
        return None;
    }
    let mut clock_sources = Vec::with_capacity(usize::from(clock_sources_count));
    for _ in 0..clock_sources_count {
        clock_sources.push(buf.get_u16());
    }
    Some(ClockDomainDescriptor {
        object_name,
        localized_description,
        clock_source_index,
        clock_sources,
    })
}

/// Encode a CLOCK_DOMAIN descriptor body (used by test doubles)
pub fn encode_clock_domain(buf: &mut BytesMut, d: &ClockDomainDescriptor) {
    buf.put_slice(d.object_name.as_buffer());
    buf.put_u16(d.localized_description);
    buf.put_u16(d.clock_source_index);
    buf.put_u16(76); // clock_sources_offset, fixed by the layout
    buf.put_u16(d.clock_sources.len() as u16);
    for &source in &d.clock_sources {
        buf.put_u16(source);
    }
}
