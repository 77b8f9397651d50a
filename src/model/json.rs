//! JSON dump and load of an enumerated entity model.
//!
//! The dump is a versioned object with the static and dynamic halves
//! selectable through [`Flags`]. Loading validates the static/dynamic
//! coherency invariant unless `IGNORE_SANITY_CHECKS` is set.

use super::EntityTree;
use thiserror::Error;

/// Version written to and required from a dump
pub const DUMP_VERSION: u32 = 1;

const KEY_DUMP_VERSION: &str = "dump_version";
const KEY_STATIC: &str = "static_model";
const KEY_DYNAMIC: &str = "dynamic_model";
const KEY_IDENTITY: &str = "identity";
const KEY_ENTITY_DESCRIPTOR: &str = "entity_descriptor";

/// Serialization behavior flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    /// Include the static half of the model
    pub const PROCESS_STATIC_MODEL: Self = Self(1 << 0);
    /// Include the dynamic half of the model
    pub const PROCESS_DYNAMIC_MODEL: Self = Self(1 << 1);
    /// Skip coherency validation on load
    pub const IGNORE_SANITY_CHECKS: Self = Self(1 << 2);

    /// Both model halves, with sanity checks
    #[must_use]
    pub const fn full() -> Self {
        Self(Self::PROCESS_STATIC_MODEL.0 | Self::PROCESS_DYNAMIC_MODEL.0)
    }

    /// Whether all bits of `other` are set
    #[must_use]
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Errors while producing a JSON dump
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializationError {
    /// The destination could not be written
    #[error("access denied")]
    AccessDenied,
    /// The requested entity is not known
    #[error("unknown entity")]
    UnknownEntity,
    /// A descriptor index in the model is out of sequence
    #[error("invalid descriptor index")]
    InvalidDescriptorIndex,
    /// The dump was produced but parts were skipped
    #[error("incomplete serialization")]
    Incomplete,
    /// The feature is not available
    #[error("not supported")]
    NotSupported,
    /// Internal library error
    #[error("internal error")]
    InternalError,
}

/// Errors while loading a JSON dump
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeserializationError {
    /// The source could not be read
    #[error("access denied")]
    AccessDenied,
    /// The dump was written by an incompatible version
    #[error("unsupported dump version")]
    UnsupportedDumpVersion,
    /// The input is not valid JSON
    #[error("parse error")]
    ParseError,
    /// A mandatory key is missing
    #[error("missing key: {0}")]
    MissingKey(String),
    /// A key could not be converted to the expected type
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// A value could not be converted to the expected type
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// Other conversion error
    #[error("other error")]
    OtherError,
    /// An entity with the same id is already present
    #[error("duplicate entity id")]
    DuplicateEntityId,
    /// The model violates 1722.1 coherency rules
    #[error("model not compliant")]
    NotCompliant,
    /// The feature is not available
    #[error("not supported")]
    NotSupported,
    /// Internal library error
    #[error("internal error")]
    InternalError,
}

/// Serialize an entity tree to a JSON dump object
///
/// # Errors
///
/// Returns `InternalError` if a model value cannot be represented.
pub fn create_json_object(
    tree: &EntityTree,
    flags: Flags,
) -> Result<serde_json::Value, SerializationError> {
    let mut object = serde_json::Map::new();
    object.insert(KEY_DUMP_VERSION.into(), DUMP_VERSION.into());
    object.insert(
        KEY_IDENTITY.into(),
        serde_json::to_value(tree.identity).map_err(|_| SerializationError::InternalError)?,
    );

    if flags.contains(Flags::PROCESS_STATIC_MODEL) {
        object.insert(
            KEY_ENTITY_DESCRIPTOR.into(),
            serde_json::to_value(&tree.entity_descriptor)
                .map_err(|_| SerializationError::InternalError)?,
        );
        object.insert(
            KEY_STATIC.into(),
            serde_json::to_value(&tree.configurations)
                .map_err(|_| SerializationError::InternalError)?,
        );
    }
    if flags.contains(Flags::PROCESS_DYNAMIC_MODEL) {
        object.insert(
            KEY_DYNAMIC.into(),
            serde_json::to_value(&tree.dynamic).map_err(|_| SerializationError::InternalError)?,
        );
    }

    Ok(serde_json::Value::Object(object))
}

/// Load an entity tree from a JSON dump object
///
/// # Errors
///
/// See [`DeserializationError`]; notably `UnsupportedDumpVersion` for
/// version mismatches and `NotCompliant` when the dynamic model references
/// descriptors absent from the static model (unless
/// `IGNORE_SANITY_CHECKS` is set).
pub fn create_entity_tree(
    object: &serde_json::Value,
    flags: Flags,
) -> Result<EntityTree, DeserializationError> {
    let map = object
        .as_object()
        .ok_or(DeserializationError::ParseError)?;

    let version = map
        .get(KEY_DUMP_VERSION)
        .ok_or_else(|| DeserializationError::MissingKey(KEY_DUMP_VERSION.into()))?
        .as_u64()
        .ok_or_else(|| DeserializationError::InvalidValue(KEY_DUMP_VERSION.into()))?;
    if version != u64::from(DUMP_VERSION) {
        return Err(DeserializationError::UnsupportedDumpVersion);
    }

    let mut tree = EntityTree {
        identity: field(map, KEY_IDENTITY)?,
        ..EntityTree::default()
    };

    if flags.contains(Flags::PROCESS_STATIC_MODEL) {
        tree.entity_descriptor = field(map, KEY_ENTITY_DESCRIPTOR)?;
        tree.configurations = field(map, KEY_STATIC)?;
    }
    if flags.contains(Flags::PROCESS_DYNAMIC_MODEL) {
        tree.dynamic = field(map, KEY_DYNAMIC)?;
    }

    if flags.contains(Flags::PROCESS_STATIC_MODEL)
        && flags.contains(Flags::PROCESS_DYNAMIC_MODEL)
        && !flags.contains(Flags::IGNORE_SANITY_CHECKS)
        && !tree.is_coherent()
    {
        return Err(DeserializationError::NotCompliant);
    }

    Ok(tree)
}

fn field<T: serde::de::DeserializeOwned>(
    map: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<T, DeserializationError> {
    let value = map
        .get(key)
        .ok_or_else(|| DeserializationError::MissingKey(key.into()))?;
    serde_json::from_value(value.clone())
        .map_err(|_| DeserializationError::InvalidValue(key.into()))
}

/// Serde adapter storing the per-descriptor name map as an entry list,
/// since JSON object keys cannot be tuples.
pub mod named_map {
    use crate::model::DescriptorType;
    use crate::types::{AvdeccFixedString, DescriptorIndex};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    struct Entry {
        descriptor_type: DescriptorType,
        descriptor_index: DescriptorIndex,
        name: AvdeccFixedString,
    }

    /// Serialize the map as a list of entries
    pub fn serialize<S: Serializer>(
        map: &BTreeMap<(DescriptorType, DescriptorIndex), AvdeccFixedString>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let entries: Vec<Entry> = map
            .iter()
            .map(|(&(descriptor_type, descriptor_index), &name)| Entry {
                descriptor_type,
                descriptor_index,
                name,
            })
            .collect();
        entries.serialize(serializer)
    }

    /// Deserialize the map from a list of entries
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<(DescriptorType, DescriptorIndex), AvdeccFixedString>, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|e| ((e.descriptor_type, e.descriptor_index), e.name))
            .collect())
    }
}
