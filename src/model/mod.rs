//! AVDECC entity model: descriptor tree, static/dynamic split, acquire state

pub mod json;
#[cfg(test)]
mod tests;

use crate::types::{
    AudioMapping, AvbInterfaceIndex, AvdeccFixedString, ClockDomainIndex, ClockSourceIndex,
    ClusterIndex, ConfigurationIndex, DescriptorIndex, EntityCapabilities, JackIndex, MacAddress,
    MemoryObjectIndex, SamplingRate, StreamFormat, StreamIdentification, StreamIndex,
    StreamPortIndex, UniqueIdentifier,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// AEM descriptor types (IEEE 1722.1-2013 Table 7.1, controller subset)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(u16)]
pub enum DescriptorType {
    /// ENTITY
    Entity = 0x0000,
    /// CONFIGURATION
    Configuration = 0x0001,
    /// AUDIO_UNIT
    AudioUnit = 0x0002,
    /// STREAM_INPUT
    StreamInput = 0x0005,
    /// STREAM_OUTPUT
    StreamOutput = 0x0006,
    /// JACK_INPUT
    JackInput = 0x0007,
    /// JACK_OUTPUT
    JackOutput = 0x0008,
    /// AVB_INTERFACE
    AvbInterface = 0x0009,
    /// CLOCK_SOURCE
    ClockSource = 0x000A,
    /// MEMORY_OBJECT
    MemoryObject = 0x000B,
    /// LOCALE
    Locale = 0x000C,
    /// STRINGS
    Strings = 0x000D,
    /// STREAM_PORT_INPUT
    StreamPortInput = 0x000E,
    /// STREAM_PORT_OUTPUT
    StreamPortOutput = 0x000F,
    /// AUDIO_CLUSTER
    AudioCluster = 0x0014,
    /// AUDIO_MAP
    AudioMap = 0x0017,
    /// CLOCK_DOMAIN
    ClockDomain = 0x0024,
}

impl DescriptorType {
    /// Parse from the wire value
    #[must_use]
    pub fn from_wire(value: u16) -> Option<Self> {
        Some(match value {
            0x0000 => Self::Entity,
            0x0001 => Self::Configuration,
            0x0002 => Self::AudioUnit,
            0x0005 => Self::StreamInput,
            0x0006 => Self::StreamOutput,
            0x0007 => Self::JackInput,
            0x0008 => Self::JackOutput,
            0x0009 => Self::AvbInterface,
            0x000A => Self::ClockSource,
            0x000B => Self::MemoryObject,
            0x000C => Self::Locale,
            0x000D => Self::Strings,
            0x000E => Self::StreamPortInput,
            0x000F => Self::StreamPortOutput,
            0x0014 => Self::AudioCluster,
            0x0017 => Self::AudioMap,
            0x0024 => Self::ClockDomain,
            _ => return None,
        })
    }
}

/// Identity fields advertised over ADP and carried in the entity descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Entity id
    pub entity_id: UniqueIdentifier,
    /// Entity model id
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
    /// Last seen available index
    pub available_index: u32,
}

/// ENTITY descriptor (static fields; names live in the dynamic model)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Identity fields
    pub identity: Identity,
    /// Association id
    pub association_id: UniqueIdentifier,
    /// Entity name at enumeration time
    pub entity_name: AvdeccFixedString,
    /// Localized vendor name string reference
    pub vendor_name_string: u16,
    /// Localized model name string reference
    pub model_name_string: u16,
    /// Firmware version string
    pub firmware_version: AvdeccFixedString,
    /// Group name at enumeration time
    pub group_name: AvdeccFixedString,
    /// Serial number string
    pub serial_number: AvdeccFixedString,
    /// Number of configurations
    pub configurations_count: u16,
    /// Active configuration at enumeration time
    pub current_configuration: ConfigurationIndex,
}

/// CONFIGURATION descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationDescriptor {
    /// Object name
    pub object_name: AvdeccFixedString,
    /// Localized description string reference
    pub localized_description: u16,
    /// Child descriptor counts, keyed by descriptor type wire value
    pub descriptor_counts: BTreeMap<u16, u16>,
}

impl ConfigurationDescriptor {
    /// Count of children of one descriptor type
    #[must_use]
    pub fn count_of(&self, descriptor_type: DescriptorType) -> u16 {
        self.descriptor_counts
            .get(&(descriptor_type as u16))
            .copied()
            .unwrap_or(0)
    }
}

/// AUDIO_UNIT descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioUnitDescriptor {
    /// Object name
    pub object_name: AvdeccFixedString,
    /// Localized description string reference
    pub localized_description: u16,
    /// Clock domain the unit belongs to
    pub clock_domain_index: ClockDomainIndex,
    /// Number of stream input ports
    pub number_of_stream_input_ports: u16,
    /// First stream input port index
    pub base_stream_input_port: StreamPortIndex,
    /// Number of stream output ports
    pub number_of_stream_output_ports: u16,
    /// First stream output port index
    pub base_stream_output_port: StreamPortIndex,
    /// Sampling rate at enumeration time
    pub current_sampling_rate: SamplingRate,
    /// Supported sampling rates
    pub sampling_rates: Vec<SamplingRate>,
}

/// STREAM_INPUT / STREAM_OUTPUT descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Object name
    pub object_name: AvdeccFixedString,
    /// Localized description string reference
    pub localized_description: u16,
    /// Clock domain the stream belongs to
    pub clock_domain_index: ClockDomainIndex,
    /// Stream flags
    pub stream_flags: u16,
    /// Stream format at enumeration time
    pub current_format: StreamFormat,
    /// AVB interface the stream runs on
    pub avb_interface_index: AvbInterfaceIndex,
    /// Ingress/egress buffer length in nanoseconds
    pub buffer_length: u32,
    /// Supported stream formats
    pub formats: Vec<StreamFormat>,
}

/// JACK_INPUT / JACK_OUTPUT descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JackDescriptor {
    /// Object name
    pub object_name: AvdeccFixedString,
    /// Localized description string reference
    pub localized_description: u16,
    /// Jack flags
    pub jack_flags: u16,
    /// Jack type
    pub jack_type: u16,
}

/// AVB_INTERFACE descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvbInterfaceDescriptor {
    /// Object name
    pub object_name: AvdeccFixedString,
    /// Localized description string reference
    pub localized_description: u16,
    /// MAC address of the interface
    pub mac_address: MacAddress,
    /// Interface flags
    pub interface_flags: u16,
    /// Clock identity of the interface
    pub clock_identity: UniqueIdentifier,
    /// gPTP priority1
    pub priority1: u8,
    /// gPTP clock class
    pub clock_class: u8,
    /// gPTP domain number
    pub domain_number: u8,
}

/// CLOCK_SOURCE descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSourceDescriptor {
    /// Object name
    pub object_name: AvdeccFixedString,
    /// Localized description string reference
    pub localized_description: u16,
    /// Clock source flags
    pub clock_source_flags: u16,
    /// Clock source type
    pub clock_source_type: u16,
    /// Clock source identifier
    pub clock_source_identifier: UniqueIdentifier,
    /// Descriptor the clock comes from
    pub clock_source_location_type: u16,
    /// Index of that descriptor
    pub clock_source_location_index: DescriptorIndex,
}

/// MEMORY_OBJECT descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryObjectDescriptor {
    /// Object name
    pub object_name: AvdeccFixedString,
    /// Localized description string reference
    pub localized_description: u16,
    /// Memory object type
    pub memory_object_type: u16,
    /// Target descriptor type
    pub target_descriptor_type: u16,
    /// Target descriptor index
    pub target_descriptor_index: DescriptorIndex,
    /// Start address in entity address space
    pub start_address: u64,
    /// Maximum length in bytes
    pub maximum_length: u64,
    /// Length at enumeration time
    pub length: u64,
}

/// LOCALE descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleDescriptor {
    /// Locale identifier (e.g. "en-US")
    pub locale_id: AvdeccFixedString,
    /// Number of STRINGS descriptors for this locale
    pub number_of_string_descriptors: u16,
    /// First STRINGS descriptor index
    pub base_string_descriptor_index: DescriptorIndex,
}

/// STRINGS descriptor (seven localized strings)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringsDescriptor {
    /// The seven strings
    pub strings: Vec<AvdeccFixedString>,
}

/// STREAM_PORT_INPUT / STREAM_PORT_OUTPUT descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPortDescriptor {
    /// Clock domain the port belongs to
    pub clock_domain_index: ClockDomainIndex,
    /// Port flags
    pub port_flags: u16,
    /// Number of controls
    pub number_of_controls: u16,
    /// First control index
    pub base_control: DescriptorIndex,
    /// Number of audio clusters
    pub number_of_clusters: u16,
    /// First cluster index
    pub base_cluster: ClusterIndex,
    /// Number of audio maps
    pub number_of_maps: u16,
    /// First map index
    pub base_map: DescriptorIndex,
}

/// AUDIO_CLUSTER descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioClusterDescriptor {
    /// Object name
    pub object_name: AvdeccFixedString,
    /// Localized description string reference
    pub localized_description: u16,
    /// Signal source descriptor type
    pub signal_type: u16,
    /// Signal source descriptor index
    pub signal_index: DescriptorIndex,
    /// Output channel within the signal source
    pub signal_output: u16,
    /// Path latency in nanoseconds
    pub path_latency: u32,
    /// Block latency in nanoseconds
    pub block_latency: u32,
    /// Number of channels in the cluster
    pub channel_count: u16,
    /// Cluster format
    pub format: u8,
}

/// AUDIO_MAP descriptor (static mappings)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioMapDescriptor {
    /// The channel mappings
    pub mappings: Vec<AudioMapping>,
}

/// CLOCK_DOMAIN descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockDomainDescriptor {
    /// Object name
    pub object_name: AvdeccFixedString,
    /// Localized description string reference
    pub localized_description: u16,
    /// Selected clock source at enumeration time
    pub clock_source_index: ClockSourceIndex,
    /// Selectable clock sources
    pub clock_sources: Vec<ClockSourceIndex>,
}

/// Static descriptor tree for one configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationTree {
    /// The configuration descriptor itself
    pub descriptor: ConfigurationDescriptor,
    /// Audio units
    pub audio_units: BTreeMap<DescriptorIndex, AudioUnitDescriptor>,
    /// Stream inputs
    pub stream_inputs: BTreeMap<StreamIndex, StreamDescriptor>,
    /// Stream outputs
    pub stream_outputs: BTreeMap<StreamIndex, StreamDescriptor>,
    /// Input jacks
    pub jack_inputs: BTreeMap<JackIndex, JackDescriptor>,
    /// Output jacks
    pub jack_outputs: BTreeMap<JackIndex, JackDescriptor>,
    /// AVB interfaces
    pub avb_interfaces: BTreeMap<AvbInterfaceIndex, AvbInterfaceDescriptor>,
    /// Clock sources
    pub clock_sources: BTreeMap<ClockSourceIndex, ClockSourceDescriptor>,
    /// Memory objects
    pub memory_objects: BTreeMap<MemoryObjectIndex, MemoryObjectDescriptor>,
    /// Locales
    pub locales: BTreeMap<DescriptorIndex, LocaleDescriptor>,
    /// Localized strings
    pub strings: BTreeMap<DescriptorIndex, StringsDescriptor>,
    /// Stream input ports
    pub stream_port_inputs: BTreeMap<StreamPortIndex, StreamPortDescriptor>,
    /// Stream output ports
    pub stream_port_outputs: BTreeMap<StreamPortIndex, StreamPortDescriptor>,
    /// Audio clusters
    pub audio_clusters: BTreeMap<ClusterIndex, AudioClusterDescriptor>,
    /// Audio maps
    pub audio_maps: BTreeMap<DescriptorIndex, AudioMapDescriptor>,
    /// Clock domains
    pub clock_domains: BTreeMap<ClockDomainIndex, ClockDomainDescriptor>,
}

impl ConfigurationTree {
    /// Whether a static descriptor exists at the given type/index
    #[must_use]
    pub fn contains(&self, descriptor_type: DescriptorType, index: DescriptorIndex) -> bool {
        match descriptor_type {
            DescriptorType::Entity => index == 0,
            DescriptorType::Configuration => true,
            DescriptorType::AudioUnit => self.audio_units.contains_key(&index),
            DescriptorType::StreamInput => self.stream_inputs.contains_key(&index),
            DescriptorType::StreamOutput => self.stream_outputs.contains_key(&index),
            DescriptorType::JackInput => self.jack_inputs.contains_key(&index),
            DescriptorType::JackOutput => self.jack_outputs.contains_key(&index),
            DescriptorType::AvbInterface => self.avb_interfaces.contains_key(&index),
            DescriptorType::ClockSource => self.clock_sources.contains_key(&index),
            DescriptorType::MemoryObject => self.memory_objects.contains_key(&index),
            DescriptorType::Locale => self.locales.contains_key(&index),
            DescriptorType::Strings => self.strings.contains_key(&index),
            DescriptorType::StreamPortInput => self.stream_port_inputs.contains_key(&index),
            DescriptorType::StreamPortOutput => self.stream_port_outputs.contains_key(&index),
            DescriptorType::AudioCluster => self.audio_clusters.contains_key(&index),
            DescriptorType::AudioMap => self.audio_maps.contains_key(&index),
            DescriptorType::ClockDomain => self.clock_domains.contains_key(&index),
        }
    }

    /// Every named static descriptor of this configuration, for GET_NAME
    /// fan-out and name bookkeeping
    #[must_use]
    pub fn named_objects(&self) -> Vec<(DescriptorType, DescriptorIndex)> {
        let mut out = Vec::new();
        out.extend(
            self.audio_units
                .keys()
                .map(|&i| (DescriptorType::AudioUnit, i)),
        );
        out.extend(
            self.stream_inputs
                .keys()
                .map(|&i| (DescriptorType::StreamInput, i)),
        );
        out.extend(
            self.stream_outputs
                .keys()
                .map(|&i| (DescriptorType::StreamOutput, i)),
        );
        out.extend(
            self.avb_interfaces
                .keys()
                .map(|&i| (DescriptorType::AvbInterface, i)),
        );
        out.extend(
            self.clock_sources
                .keys()
                .map(|&i| (DescriptorType::ClockSource, i)),
        );
        out.extend(
            self.memory_objects
                .keys()
                .map(|&i| (DescriptorType::MemoryObject, i)),
        );
        out.extend(
            self.audio_clusters
                .keys()
                .map(|&i| (DescriptorType::AudioCluster, i)),
        );
        out.extend(
            self.clock_domains
                .keys()
                .map(|&i| (DescriptorType::ClockDomain, i)),
        );
        out
    }
}

/// Connection record for one listener stream.
///
/// `talker` is `None` while not connected; updates flow only from confirmed
/// ACMP responses and GET_RX_STATE probes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConnectionState {
    /// The connected talker, if any
    pub talker: Option<StreamIdentification>,
}

/// Runtime-mutable half of the entity model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicModel {
    /// Entity name
    pub entity_name: AvdeccFixedString,
    /// Entity group name
    pub group_name: AvdeccFixedString,
    /// Active configuration
    pub current_configuration: ConfigurationIndex,
    /// Per-descriptor names, keyed by (type, index) in the active configuration
    #[serde(with = "json::named_map")]
    pub names: BTreeMap<(DescriptorType, DescriptorIndex), AvdeccFixedString>,
    /// Current stream input formats
    pub stream_input_formats: BTreeMap<StreamIndex, StreamFormat>,
    /// Current stream output formats
    pub stream_output_formats: BTreeMap<StreamIndex, StreamFormat>,
    /// Stream input running status
    pub stream_input_running: BTreeMap<StreamIndex, bool>,
    /// Stream output running status
    pub stream_output_running: BTreeMap<StreamIndex, bool>,
    /// Current audio unit sampling rates
    pub sampling_rates: BTreeMap<DescriptorIndex, SamplingRate>,
    /// Selected clock source per clock domain
    pub clock_sources: BTreeMap<ClockDomainIndex, ClockSourceIndex>,
    /// Current memory object lengths
    pub memory_object_lengths: BTreeMap<MemoryObjectIndex, u64>,
    /// Dynamic mappings per stream input port
    pub stream_port_input_mappings: BTreeMap<StreamPortIndex, Vec<AudioMapping>>,
    /// Dynamic mappings per stream output port
    pub stream_port_output_mappings: BTreeMap<StreamPortIndex, Vec<AudioMapping>>,
    /// Connection state per listener stream
    pub stream_input_connections: BTreeMap<StreamIndex, StreamConnectionState>,
}

/// A fully- or partially-enumerated entity model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTree {
    /// ADP/entity-descriptor identity
    pub identity: Identity,
    /// The entity descriptor
    pub entity_descriptor: EntityDescriptor,
    /// Static descriptor trees, one per enumerated configuration
    pub configurations: BTreeMap<ConfigurationIndex, ConfigurationTree>,
    /// Runtime-mutable state
    pub dynamic: DynamicModel,
}

impl EntityTree {
    /// The static tree of the active configuration, if enumerated
    #[must_use]
    pub fn current_configuration(&self) -> Option<&ConfigurationTree> {
        self.configurations.get(&self.dynamic.current_configuration)
    }

    /// Check the static/dynamic coherency invariant: every key in the
    /// dynamic model must exist in the active configuration's static tree.
    #[must_use]
    pub fn is_coherent(&self) -> bool {
        let Some(config) = self.current_configuration() else {
            return self.dynamic == DynamicModel {
                entity_name: self.dynamic.entity_name,
                group_name: self.dynamic.group_name,
                current_configuration: self.dynamic.current_configuration,
                ..DynamicModel::default()
            };
        };

        self.dynamic
            .names
            .keys()
            .all(|&(t, i)| config.contains(t, i))
            && self
                .dynamic
                .stream_input_formats
                .keys()
                .chain(self.dynamic.stream_input_running.keys())
                .chain(self.dynamic.stream_input_connections.keys())
                .all(|&i| config.contains(DescriptorType::StreamInput, i))
            && self
                .dynamic
                .stream_output_formats
                .keys()
                .chain(self.dynamic.stream_output_running.keys())
                .all(|&i| config.contains(DescriptorType::StreamOutput, i))
            && self
                .dynamic
                .sampling_rates
                .keys()
                .all(|&i| config.contains(DescriptorType::AudioUnit, i))
            && self
                .dynamic
                .clock_sources
                .keys()
                .all(|&i| config.contains(DescriptorType::ClockDomain, i))
            && self
                .dynamic
                .memory_object_lengths
                .keys()
                .all(|&i| config.contains(DescriptorType::MemoryObject, i))
            && self
                .dynamic
                .stream_port_input_mappings
                .keys()
                .all(|&i| config.contains(DescriptorType::StreamPortInput, i))
            && self
                .dynamic
                .stream_port_output_mappings
                .keys()
                .all(|&i| config.contains(DescriptorType::StreamPortOutput, i))
    }
}

/// Exclusive-ownership state of a remote entity, driven only by explicit
/// ACQUIRE/RELEASE outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AcquireState {
    /// Not acquired by anyone we know of
    #[default]
    NotAcquired,
    /// An ACQUIRE command is in flight
    TryAcquire,
    /// Acquired by this controller
    Acquired,
    /// Acquired by another controller
    AcquiredByOther,
    /// An acquire attempt failed in an unclassifiable way
    Undefined,
}
