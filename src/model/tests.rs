use super::json::{create_entity_tree, create_json_object, DeserializationError, Flags};
use super::*;
use crate::types::{AvdeccFixedString, SamplingRate, StreamFormat};

fn minimal_tree() -> EntityTree {
    let mut config = ConfigurationTree::default();
    config
        .descriptor
        .descriptor_counts
        .insert(DescriptorType::AudioUnit as u16, 1);
    config
        .descriptor
        .descriptor_counts
        .insert(DescriptorType::StreamInput as u16, 1);
    config.audio_units.insert(0, AudioUnitDescriptor::default());
    config.stream_inputs.insert(
        0,
        StreamDescriptor {
            object_name: "Input 0".into(),
            current_format: StreamFormat(0x00A0_0204_6000_0800),
            ..StreamDescriptor::default()
        },
    );

    let mut tree = EntityTree {
        identity: Identity {
            entity_id: crate::types::UniqueIdentifier::new(0x0011_2233_4455_6677),
            ..Identity::default()
        },
        ..EntityTree::default()
    };
    tree.configurations.insert(0, config);
    tree.dynamic.current_configuration = 0;
    tree.dynamic.entity_name = AvdeccFixedString::new("Test Unit");
    tree.dynamic
        .stream_input_formats
        .insert(0, StreamFormat(0x00A0_0204_6000_0800));
    tree.dynamic.sampling_rates.insert(0, SamplingRate::from_hz(48_000));
    tree
}

#[test]
fn test_coherent_tree() {
    assert!(minimal_tree().is_coherent());
}

#[test]
fn test_incoherent_dynamic_key_detected() {
    let mut tree = minimal_tree();
    // Stream index 5 has no static descriptor
    tree.dynamic
        .stream_input_formats
        .insert(5, StreamFormat(0x1));
    assert!(!tree.is_coherent());
}

#[test]
fn test_contains_lookup() {
    let tree = minimal_tree();
    let config = tree.current_configuration().unwrap();
    assert!(config.contains(DescriptorType::AudioUnit, 0));
    assert!(config.contains(DescriptorType::StreamInput, 0));
    assert!(!config.contains(DescriptorType::StreamInput, 1));
    assert!(!config.contains(DescriptorType::ClockDomain, 0));
}

#[test]
fn test_acquire_state_default() {
    assert_eq!(AcquireState::default(), AcquireState::NotAcquired);
}

#[test]
fn test_json_full_roundtrip() {
    let tree = minimal_tree();
    let dump = create_json_object(&tree, Flags::full()).unwrap();
    let restored = create_entity_tree(&dump, Flags::full()).unwrap();
    assert_eq!(restored, tree);
}

#[test]
fn test_json_static_only() {
    let tree = minimal_tree();
    let dump = create_json_object(&tree, Flags::PROCESS_STATIC_MODEL).unwrap();
    assert!(dump.get("static_model").is_some());
    assert!(dump.get("dynamic_model").is_none());

    let restored = create_entity_tree(&dump, Flags::PROCESS_STATIC_MODEL).unwrap();
    assert_eq!(restored.configurations, tree.configurations);
    assert_eq!(restored.dynamic, DynamicModel::default());
}

#[test]
fn test_json_version_check() {
    let tree = minimal_tree();
    let mut dump = create_json_object(&tree, Flags::full()).unwrap();
    dump["dump_version"] = serde_json::json!(99);
    assert_eq!(
        create_entity_tree(&dump, Flags::full()),
        Err(DeserializationError::UnsupportedDumpVersion)
    );
}

#[test]
fn test_json_missing_key() {
    let tree = minimal_tree();
    let mut dump = create_json_object(&tree, Flags::full()).unwrap();
    dump.as_object_mut().unwrap().remove("identity");
    assert!(matches!(
        create_entity_tree(&dump, Flags::full()),
        Err(DeserializationError::MissingKey(_))
    ));
}

#[test]
fn test_json_sanity_check() {
    let mut tree = minimal_tree();
    tree.dynamic
        .stream_input_formats
        .insert(9, StreamFormat(0x1));
    let dump = create_json_object(&tree, Flags::full()).unwrap();

    assert_eq!(
        create_entity_tree(&dump, Flags::full()),
        Err(DeserializationError::NotCompliant)
    );
    // Same dump loads when sanity checks are waived
    let restored =
        create_entity_tree(&dump, Flags::full() | Flags::IGNORE_SANITY_CHECKS).unwrap();
    assert_eq!(restored.dynamic.stream_input_formats.len(), 2);
}

#[test]
fn test_json_parse_error() {
    assert_eq!(
        create_entity_tree(&serde_json::json!([1, 2, 3]), Flags::full()),
        Err(DeserializationError::ParseError)
    );
}
