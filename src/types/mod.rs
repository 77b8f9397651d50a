//! Core identifier and value types shared across the library

mod config;
#[cfg(test)]
mod tests;

pub use config::{ControllerConfig, ControllerConfigBuilder};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Index of a descriptor within its type, inside one configuration
pub type DescriptorIndex = u16;
/// Index of a configuration within an entity
pub type ConfigurationIndex = u16;
/// Index of a stream input or output descriptor
pub type StreamIndex = u16;
/// Index of an audio unit descriptor
pub type AudioUnitIndex = u16;
/// Index of an AVB interface descriptor
pub type AvbInterfaceIndex = u16;
/// Index of a clock source descriptor
pub type ClockSourceIndex = u16;
/// Index of a clock domain descriptor
pub type ClockDomainIndex = u16;
/// Index of a memory object descriptor
pub type MemoryObjectIndex = u16;
/// Index of a stream port descriptor
pub type StreamPortIndex = u16;
/// Index of an audio cluster descriptor
pub type ClusterIndex = u16;
/// Index of an audio map descriptor
pub type MapIndex = u16;
/// Index of a jack descriptor
pub type JackIndex = u16;
/// Index of a locale descriptor
pub type LocaleIndex = u16;

/// 64-bit EUI-64 identifier for entities, streams and clock references.
///
/// The all-zeros value is reserved and means "null / unset".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct UniqueIdentifier(u64);

impl UniqueIdentifier {
    /// The null identifier (all zeros)
    pub const NULL: Self = Self(0);

    /// Create from a raw 64-bit value
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw 64-bit value
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Whether this is the null identifier
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Derive a controller EUI-64 from a MAC address and a 16-bit program id.
    ///
    /// The program id is inserted between the OUI and the device-specific
    /// half of the MAC, so two controllers on the same host get distinct
    /// identifiers as long as their program ids differ.
    #[must_use]
    pub fn from_prog_id(mac: MacAddress, prog_id: u16) -> Self {
        let m = mac.as_bytes();
        let [hi, lo] = prog_id.to_be_bytes();
        Self(u64::from_be_bytes([
            m[0], m[1], m[2], hi, lo, m[3], m[4], m[5],
        ]))
    }
}

impl fmt::Display for UniqueIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018X}", self.0)
    }
}

impl From<u64> for UniqueIdentifier {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Serialize for UniqueIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#018X}", self.0))
    }
}

impl<'de> Deserialize<'de> for UniqueIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(&s);
        u64::from_str_radix(digits, 16)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

/// 6-byte link-layer address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Multicast destination used for ADP and ACMP messages (91:e0:f0:01:00:00)
    pub const IDENTIFICATION_MULTICAST: Self = Self([0x91, 0xE0, 0xF0, 0x01, 0x00, 0x00]);

    /// Create from raw bytes
    #[must_use]
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

/// Fixed-width (64 byte) UTF-8 string used in descriptors.
///
/// Stored NUL-padded on the wire; constructors truncate over-long input at
/// a character boundary so the buffer always holds valid UTF-8.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AvdeccFixedString {
    buffer: [u8; Self::CAPACITY],
}

impl AvdeccFixedString {
    /// Wire size of the string buffer
    pub const CAPACITY: usize = 64;

    /// Create from a string slice, truncating at a char boundary if needed
    #[must_use]
    pub fn new(s: &str) -> Self {
        let mut buffer = [0u8; Self::CAPACITY];
        let mut len = s.len().min(Self::CAPACITY);
        while len > 0 && !s.is_char_boundary(len) {
            len -= 1;
        }
        buffer[..len].copy_from_slice(&s.as_bytes()[..len]);
        Self { buffer }
    }

    /// Create from a raw wire buffer; an invalid UTF-8 tail is dropped
    #[must_use]
    pub fn from_buffer(bytes: &[u8; Self::CAPACITY]) -> Self {
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(Self::CAPACITY);
        match std::str::from_utf8(&bytes[..len]) {
            Ok(s) => Self::new(s),
            Err(e) => {
                let valid = e.valid_up_to();
                Self::new(std::str::from_utf8(&bytes[..valid]).unwrap_or(""))
            }
        }
    }

    /// The string value, without padding
    #[must_use]
    pub fn as_str(&self) -> &str {
        let len = self
            .buffer
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(Self::CAPACITY);
        std::str::from_utf8(&self.buffer[..len]).unwrap_or("")
    }

    /// The raw NUL-padded buffer, as written to the wire
    #[must_use]
    pub const fn as_buffer(&self) -> &[u8; Self::CAPACITY] {
        &self.buffer
    }

    /// Whether the string is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer[0] == 0
    }
}

impl Default for AvdeccFixedString {
    fn default() -> Self {
        Self {
            buffer: [0u8; Self::CAPACITY],
        }
    }
}

impl fmt::Debug for AvdeccFixedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AvdeccFixedString({:?})", self.as_str())
    }
}

impl fmt::Display for AvdeccFixedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for AvdeccFixedString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for AvdeccFixedString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AvdeccFixedString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::new(&s))
    }
}

/// Stream format code (64-bit, per IEEE 1722.1 stream format encoding)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct StreamFormat(pub u64);

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018X}", self.0)
    }
}

/// Sampling rate (pull field + base frequency packed in 32 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SamplingRate(pub u32);

impl SamplingRate {
    /// Build from a plain frequency in Hz (pull multiplier 1.0)
    #[must_use]
    pub const fn from_hz(hz: u32) -> Self {
        Self(hz & 0x1FFF_FFFF)
    }

    /// Frequency in Hz, ignoring the pull field
    #[must_use]
    pub const fn hz(&self) -> u32 {
        self.0 & 0x1FFF_FFFF
    }
}

/// Identifies one stream of one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamIdentification {
    /// Owning entity
    pub entity_id: UniqueIdentifier,
    /// Stream input/output descriptor index
    pub stream_index: StreamIndex,
}

/// One channel mapping between a stream and an audio cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioMapping {
    /// Stream descriptor index the channel belongs to
    pub stream_index: StreamIndex,
    /// Channel within the stream
    pub stream_channel: u16,
    /// Audio cluster offset within the stream port
    pub cluster_offset: u16,
    /// Channel within the cluster
    pub cluster_channel: u16,
}

/// Entity capability flags advertised over ADP (raw 32-bit field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityCapabilities(pub u32);

impl EntityCapabilities {
    /// Entity supports the AVDECC Entity Model
    pub const AEM_SUPPORTED: u32 = 0x0000_0008;

    /// Whether the AEM_SUPPORTED bit is set
    #[must_use]
    pub const fn aem_supported(&self) -> bool {
        self.0 & Self::AEM_SUPPORTED != 0
    }
}
