//! Entity-model enumeration: walks a discovered entity's descriptor tree
//! and queries its dynamic state, producing the [`EntityTree`] the cache
//! serves to readers.
//!
//! The walk is sequential per entity (the command pipeline serialises
//! AECP per target anyway). Transient failures retry with exponential
//! backoff; a hard failure on a static descriptor aborts the walk and
//! flags the entity, which is still advertised with its partial model.

#[cfg(test)]
mod tests;

use crate::controller::engine::CommandHandle;
use crate::error::AemError;
use crate::model::{
    ConfigurationTree, DescriptorType, EntityTree, StreamConnectionState,
};
use crate::pipeline::AecpResponse;
use crate::protocol::aem::{self, Descriptor};
use crate::protocol::{AcmpMessageType, AemCommandType};
use crate::types::{
    AvdeccFixedString, ConfigurationIndex, ControllerConfig, DescriptorIndex, SamplingRate,
    StreamIdentification, UniqueIdentifier,
};
use bytes::Bytes;
use futures::future::join_all;

/// Result of one enumeration run
pub(crate) struct EnumerationOutcome {
    /// The model built so far (partial on failure)
    pub(crate) tree: EntityTree,
    /// Whether a mandatory step failed hard
    pub(crate) failed: bool,
}

/// Enumerate one entity end to end
pub(crate) async fn enumerate(
    handle: &CommandHandle,
    target: UniqueIdentifier,
    config: &ControllerConfig,
) -> EnumerationOutcome {
    let mut tree = EntityTree::default();
    tree.identity.entity_id = target;

    tracing::debug!(
        target: "avdecc::controller_entity",
        entity = %target,
        "enumeration started"
    );

    // Step 1: the entity descriptor roots everything else
    let entity_descriptor = match read_descriptor(handle, config, target, 0, DescriptorType::Entity, 0)
        .await
    {
        Ok(Descriptor::Entity(descriptor)) => descriptor,
        Ok(_) => return failed(tree, target, "entity descriptor of wrong type"),
        Err(err) => return failed(tree, target, &format!("entity descriptor: {err}")),
    };

    tree.identity = entity_descriptor.identity;
    tree.identity.entity_id = target;
    tree.dynamic.current_configuration = entity_descriptor.current_configuration;
    tree.dynamic.entity_name = entity_descriptor.entity_name;
    tree.dynamic.group_name = entity_descriptor.group_name;
    tree.entity_descriptor = entity_descriptor.clone();

    // Step 2: static trees, for the active configuration or all of them
    let configurations: Vec<ConfigurationIndex> = if config.enumerate_all_configurations {
        (0..entity_descriptor.configurations_count).collect()
    } else {
        vec![entity_descriptor.current_configuration]
    };

    for configuration_index in configurations {
        match walk_configuration(handle, config, target, configuration_index).await {
            Ok(configuration) => {
                tree.configurations.insert(configuration_index, configuration);
            }
            Err(err) => {
                return failed(
                    tree,
                    target,
                    &format!("configuration {configuration_index}: {err}"),
                )
            }
        }
    }

    // Step 3: dynamic state of the active configuration
    query_dynamic_state(handle, config, target, &mut tree).await;

    // Step 4: listener connection state
    probe_connections(handle, target, &mut tree).await;

    tracing::debug!(
        target: "avdecc::controller_entity",
        entity = %target,
        "enumeration complete"
    );
    EnumerationOutcome { tree, failed: false }
}

fn failed(tree: EntityTree, target: UniqueIdentifier, reason: &str) -> EnumerationOutcome {
    tracing::warn!(
        target: "avdecc::controller_entity",
        entity = %target,
        reason,
        "enumeration failed"
    );
    EnumerationOutcome { tree, failed: true }
}

async fn walk_configuration(
    handle: &CommandHandle,
    config: &ControllerConfig,
    target: UniqueIdentifier,
    configuration_index: ConfigurationIndex,
) -> Result<ConfigurationTree, AemError> {
    let descriptor = match read_descriptor(
        handle,
        config,
        target,
        configuration_index,
        DescriptorType::Configuration,
        configuration_index,
    )
    .await?
    {
        Descriptor::Configuration(descriptor) => descriptor,
        _ => return Err(AemError::ProtocolError),
    };

    let mut configuration = ConfigurationTree {
        descriptor,
        ..ConfigurationTree::default()
    };

    // Fan out over every child descriptor the configuration reports
    let child_types = [
        DescriptorType::AudioUnit,
        DescriptorType::StreamInput,
        DescriptorType::StreamOutput,
        DescriptorType::JackInput,
        DescriptorType::JackOutput,
        DescriptorType::AvbInterface,
        DescriptorType::ClockSource,
        DescriptorType::MemoryObject,
        DescriptorType::Locale,
        DescriptorType::Strings,
        DescriptorType::StreamPortInput,
        DescriptorType::StreamPortOutput,
        DescriptorType::AudioCluster,
        DescriptorType::AudioMap,
        DescriptorType::ClockDomain,
    ];
    for descriptor_type in child_types {
        let count = configuration.descriptor.count_of(descriptor_type);
        for index in 0..count {
            let descriptor = read_descriptor(
                handle,
                config,
                target,
                configuration_index,
                descriptor_type,
                index,
            )
            .await?;
            slot_fill(&mut configuration, descriptor_type, index, descriptor)?;
        }
    }

    Ok(configuration)
}

/// Place a parsed descriptor at its position in the static tree
fn slot_fill(
    configuration: &mut ConfigurationTree,
    descriptor_type: DescriptorType,
    index: DescriptorIndex,
    descriptor: Descriptor,
) -> Result<(), AemError> {
    match (descriptor_type, descriptor) {
        (DescriptorType::AudioUnit, Descriptor::AudioUnit(d)) => {
            configuration.audio_units.insert(index, d);
        }
        (DescriptorType::StreamInput, Descriptor::Stream(d)) => {
            configuration.stream_inputs.insert(index, d);
        }
        (DescriptorType::StreamOutput, Descriptor::Stream(d)) => {
            configuration.stream_outputs.insert(index, d);
        }
        (DescriptorType::JackInput, Descriptor::Jack(d)) => {
            configuration.jack_inputs.insert(index, d);
        }
        (DescriptorType::JackOutput, Descriptor::Jack(d)) => {
            configuration.jack_outputs.insert(index, d);
        }
        (DescriptorType::AvbInterface, Descriptor::AvbInterface(d)) => {
            configuration.avb_interfaces.insert(index, d);
        }
        (DescriptorType::ClockSource, Descriptor::ClockSource(d)) => {
            configuration.clock_sources.insert(index, d);
        }
        (DescriptorType::MemoryObject, Descriptor::MemoryObject(d)) => {
            configuration.memory_objects.insert(index, d);
        }
        (DescriptorType::Locale, Descriptor::Locale(d)) => {
            configuration.locales.insert(index, d);
        }
        (DescriptorType::Strings, Descriptor::Strings(d)) => {
            configuration.strings.insert(index, d);
        }
        (DescriptorType::StreamPortInput, Descriptor::StreamPort(d)) => {
            configuration.stream_port_inputs.insert(index, d);
        }
        (DescriptorType::StreamPortOutput, Descriptor::StreamPort(d)) => {
            configuration.stream_port_outputs.insert(index, d);
        }
        (DescriptorType::AudioCluster, Descriptor::AudioCluster(d)) => {
            configuration.audio_clusters.insert(index, d);
        }
        (DescriptorType::AudioMap, Descriptor::AudioMap(d)) => {
            configuration.audio_maps.insert(index, d);
        }
        (DescriptorType::ClockDomain, Descriptor::ClockDomain(d)) => {
            configuration.clock_domains.insert(index, d);
        }
        _ => return Err(AemError::ProtocolError),
    }
    Ok(())
}

/// Query per-object dynamic state. Failures here are non-fatal: the
/// static descriptors already carry an initial value for everything.
async fn query_dynamic_state(
    handle: &CommandHandle,
    config: &ControllerConfig,
    target: UniqueIdentifier,
    tree: &mut EntityTree,
) {
    if let Ok(response) = aecp_retry(
        handle,
        config,
        target,
        AemCommandType::GetConfiguration,
        Bytes::new(),
    )
    .await
    {
        if let Some(current) = aem::decode_configuration_response(&response.payload) {
            tree.dynamic.current_configuration = current;
        }
    }

    let current = tree.dynamic.current_configuration;
    let Some(configuration) = tree.configurations.get(&current).cloned() else {
        return;
    };

    // Entity-level names
    for (name_index, fallback) in [
        (0u16, tree.dynamic.entity_name),
        (1u16, tree.dynamic.group_name),
    ] {
        let name = get_name(handle, config, target, DescriptorType::Entity, 0, name_index, current)
            .await
            .unwrap_or(fallback);
        if name_index == 0 {
            tree.dynamic.entity_name = name;
        } else {
            tree.dynamic.group_name = name;
        }
    }

    // Configuration name
    let configuration_name = get_name(
        handle,
        config,
        target,
        DescriptorType::Configuration,
        current,
        0,
        current,
    )
    .await
    .unwrap_or(configuration.descriptor.object_name);
    tree.dynamic
        .names
        .insert((DescriptorType::Configuration, current), configuration_name);

    // Per-object names, with static fallbacks. The queries are joined as
    // one batch; the pipeline drains them through its per-target FIFO.
    let names = join_all(configuration.named_objects().into_iter().map(
        |(descriptor_type, index)| {
            let fallback = static_object_name(&configuration, descriptor_type, index);
            async move {
                let name = get_name(handle, config, target, descriptor_type, index, 0, current)
                    .await
                    .unwrap_or(fallback);
                ((descriptor_type, index), name)
            }
        },
    ))
    .await;
    for (key, name) in names {
        tree.dynamic.names.insert(key, name);
    }

    // Stream formats and initial running state
    for (&index, descriptor) in &configuration.stream_inputs {
        let format = get_stream_format(handle, config, target, DescriptorType::StreamInput, index)
            .await
            .unwrap_or(descriptor.current_format);
        tree.dynamic.stream_input_formats.insert(index, format);
        tree.dynamic.stream_input_running.insert(index, false);
    }
    for (&index, descriptor) in &configuration.stream_outputs {
        let format = get_stream_format(handle, config, target, DescriptorType::StreamOutput, index)
            .await
            .unwrap_or(descriptor.current_format);
        tree.dynamic.stream_output_formats.insert(index, format);
        tree.dynamic.stream_output_running.insert(index, false);
    }

    // Audio unit sampling rates
    for (&index, descriptor) in &configuration.audio_units {
        let rate = aecp_retry(
            handle,
            config,
            target,
            AemCommandType::GetSamplingRate,
            aem::sampling_rate(DescriptorType::AudioUnit as u16, index, SamplingRate(0)),
        )
        .await
        .ok()
        .and_then(|response| aem::decode_sampling_rate_response(&response.payload))
        .unwrap_or(descriptor.current_sampling_rate);
        tree.dynamic.sampling_rates.insert(index, rate);
    }

    // Clock domain source selection
    for (&index, descriptor) in &configuration.clock_domains {
        let source = aecp_retry(
            handle,
            config,
            target,
            AemCommandType::GetClockSource,
            aem::clock_source(DescriptorType::ClockDomain as u16, index, 0),
        )
        .await
        .ok()
        .and_then(|response| aem::decode_clock_source_response(&response.payload))
        .unwrap_or(descriptor.clock_source_index);
        tree.dynamic.clock_sources.insert(index, source);
    }

    // Memory object lengths
    for (&index, descriptor) in &configuration.memory_objects {
        let length = aecp_retry(
            handle,
            config,
            target,
            AemCommandType::GetMemoryObjectLength,
            aem::memory_object_length(current, index, 0),
        )
        .await
        .ok()
        .and_then(|response| aem::decode_memory_object_length_response(&response.payload))
        .unwrap_or(descriptor.length);
        tree.dynamic.memory_object_lengths.insert(index, length);
    }

    // Dynamic audio mappings, paginated by map index
    for (&index, _) in &configuration.stream_port_inputs {
        let mappings =
            get_audio_map(handle, config, target, DescriptorType::StreamPortInput, index).await;
        tree.dynamic.stream_port_input_mappings.insert(index, mappings);
    }
    for (&index, _) in &configuration.stream_port_outputs {
        let mappings =
            get_audio_map(handle, config, target, DescriptorType::StreamPortOutput, index).await;
        tree.dynamic
            .stream_port_output_mappings
            .insert(index, mappings);
    }
}

fn static_object_name(
    configuration: &ConfigurationTree,
    descriptor_type: DescriptorType,
    index: DescriptorIndex,
) -> AvdeccFixedString {
    match descriptor_type {
        DescriptorType::AudioUnit => configuration
            .audio_units
            .get(&index)
            .map(|d| d.object_name),
        DescriptorType::StreamInput => configuration
            .stream_inputs
            .get(&index)
            .map(|d| d.object_name),
        DescriptorType::StreamOutput => configuration
            .stream_outputs
            .get(&index)
            .map(|d| d.object_name),
        DescriptorType::AvbInterface => configuration
            .avb_interfaces
            .get(&index)
            .map(|d| d.object_name),
        DescriptorType::ClockSource => configuration
            .clock_sources
            .get(&index)
            .map(|d| d.object_name),
        DescriptorType::MemoryObject => configuration
            .memory_objects
            .get(&index)
            .map(|d| d.object_name),
        DescriptorType::AudioCluster => configuration
            .audio_clusters
            .get(&index)
            .map(|d| d.object_name),
        DescriptorType::ClockDomain => configuration
            .clock_domains
            .get(&index)
            .map(|d| d.object_name),
        _ => None,
    }
    .unwrap_or_default()
}

/// Probe ACMP GET_RX_STATE for every listener stream
async fn probe_connections(
    handle: &CommandHandle,
    target: UniqueIdentifier,
    tree: &mut EntityTree,
) {
    let current = tree.dynamic.current_configuration;
    let Some(configuration) = tree.configurations.get(&current) else {
        return;
    };
    let stream_indexes: Vec<DescriptorIndex> =
        configuration.stream_inputs.keys().copied().collect();

    // ACMP is multiplexed on sequence id, so the probes run concurrently
    let states = join_all(stream_indexes.into_iter().map(|stream_index| {
        let listener = StreamIdentification {
            entity_id: target,
            stream_index,
        };
        let talker_unset = StreamIdentification {
            entity_id: UniqueIdentifier::NULL,
            stream_index: 0,
        };
        async move {
            let state = match handle
                .acmp(AcmpMessageType::GetRxStateCommand, talker_unset, listener)
                .await
            {
                Ok(response) if response.status.is_success() => {
                    // connectionCount is authoritative here, and only here
                    let connected =
                        response.connection_count != 0 && !response.talker_entity_id.is_null();
                    StreamConnectionState {
                        talker: connected.then_some(StreamIdentification {
                            entity_id: response.talker_entity_id,
                            stream_index: response.talker_unique_id,
                        }),
                    }
                }
                _ => StreamConnectionState::default(),
            };
            (stream_index, state)
        }
    }))
    .await;
    for (stream_index, state) in states {
        tree.dynamic.stream_input_connections.insert(stream_index, state);
    }
}

async fn get_name(
    handle: &CommandHandle,
    config: &ControllerConfig,
    target: UniqueIdentifier,
    descriptor_type: DescriptorType,
    descriptor_index: DescriptorIndex,
    name_index: u16,
    configuration_index: ConfigurationIndex,
) -> Result<AvdeccFixedString, AemError> {
    let response = aecp_retry(
        handle,
        config,
        target,
        AemCommandType::GetName,
        aem::name(
            descriptor_type as u16,
            descriptor_index,
            name_index,
            configuration_index,
            &AvdeccFixedString::default(),
        ),
    )
    .await?;
    aem::decode_name_response(&response.payload).ok_or(AemError::ProtocolError)
}

async fn get_stream_format(
    handle: &CommandHandle,
    config: &ControllerConfig,
    target: UniqueIdentifier,
    descriptor_type: DescriptorType,
    index: DescriptorIndex,
) -> Result<crate::types::StreamFormat, AemError> {
    let response = aecp_retry(
        handle,
        config,
        target,
        AemCommandType::GetStreamFormat,
        aem::stream_format(descriptor_type as u16, index, crate::types::StreamFormat(0)),
    )
    .await?;
    aem::decode_stream_format_response(&response.payload).ok_or(AemError::ProtocolError)
}

async fn get_audio_map(
    handle: &CommandHandle,
    config: &ControllerConfig,
    target: UniqueIdentifier,
    descriptor_type: DescriptorType,
    index: DescriptorIndex,
) -> Vec<crate::types::AudioMapping> {
    let mut mappings = Vec::new();
    let mut map_index = 0u16;
    loop {
        let Ok(response) = aecp_retry(
            handle,
            config,
            target,
            AemCommandType::GetAudioMap,
            aem::get_audio_map(descriptor_type as u16, index, map_index),
        )
        .await
        else {
            break;
        };
        let Some(page) = aem::decode_audio_map_response(&response.payload) else {
            break;
        };
        mappings.extend(page.mappings);
        // pages run 0..number_of_maps
        if page.number_of_maps == 0 || page.map_index + 1 >= page.number_of_maps {
            break;
        }
        map_index = page.map_index + 1;
    }
    mappings
}

async fn read_descriptor(
    handle: &CommandHandle,
    config: &ControllerConfig,
    target: UniqueIdentifier,
    configuration_index: ConfigurationIndex,
    descriptor_type: DescriptorType,
    descriptor_index: DescriptorIndex,
) -> Result<Descriptor, AemError> {
    let response = aecp_retry(
        handle,
        config,
        target,
        AemCommandType::ReadDescriptor,
        aem::read_descriptor(configuration_index, descriptor_type as u16, descriptor_index),
    )
    .await?;
    let decoded =
        aem::decode_read_descriptor_response(&response.payload).ok_or(AemError::ProtocolError)?;
    if decoded.descriptor_type != descriptor_type || decoded.descriptor_index != descriptor_index {
        return Err(AemError::ProtocolError);
    }
    Ok(decoded.descriptor)
}

/// Issue one AECP command, retrying transient failures with exponential
/// backoff (250/500/1000 ms by default)
async fn aecp_retry(
    handle: &CommandHandle,
    config: &ControllerConfig,
    target: UniqueIdentifier,
    command_type: AemCommandType,
    payload: Bytes,
) -> Result<AecpResponse, AemError> {
    let mut delay = config.enumeration_backoff;
    let mut attempt = 0u8;
    loop {
        let err = match handle.aecp(target, command_type, payload.clone()).await {
            Ok(response) => match response.check() {
                Ok(()) => return Ok(response),
                Err(err) => err,
            },
            Err(err) => err,
        };
        if !err.is_transient() || attempt >= config.enumeration_retries {
            return Err(err);
        }
        tracing::trace!(
            target: "avdecc::controller_entity",
            entity = %target,
            command = ?command_type,
            attempt,
            error = %err,
            "transient enumeration failure, backing off"
        );
        tokio::time::sleep(delay).await;
        delay *= 2;
        attempt += 1;
    }
}
