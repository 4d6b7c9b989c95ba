//! Property bags exchanged with the host
//!
//! The host asks for an arbitrary set of keys; each role answers from a fixed
//! table of the keys it knows and ignores the rest.

use std::collections::BTreeMap;

use crate::capture::FrameDuration;
use crate::error::Result;

/// Every property the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyKey {
    ProviderManufacturer,
    DeviceTransportType,
    DeviceModel,
    StreamActiveFormatIndex,
    StreamFrameDuration,
}

impl PropertyKey {
    pub const ALL: [PropertyKey; 5] = [
        PropertyKey::ProviderManufacturer,
        PropertyKey::DeviceTransportType,
        PropertyKey::DeviceModel,
        PropertyKey::StreamActiveFormatIndex,
        PropertyKey::StreamFrameDuration,
    ];

    /// Identifier the host uses for this key
    pub fn host_name(self) -> &'static str {
        match self {
            PropertyKey::ProviderManufacturer => "manufacturer",
            PropertyKey::DeviceTransportType => "transportType",
            PropertyKey::DeviceModel => "model",
            PropertyKey::StreamActiveFormatIndex => "activeFormatIndex",
            PropertyKey::StreamFrameDuration => "frameDuration",
        }
    }

    pub fn from_host_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.host_name() == name)
    }

    /// Keys for the recognized names; unknown names are dropped
    pub fn parse_set<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<Self> {
        let mut keys: Vec<Self> = names.into_iter().filter_map(Self::from_host_name).collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// How the device is attached, as reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    Virtual,
}

impl TransportType {
    /// Four-character code the host expects
    pub fn code(self) -> u32 {
        match self {
            TransportType::Virtual => u32::from_be_bytes(*b"virt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Text(String),
    TransportType(TransportType),
    Index(usize),
    Duration(FrameDuration),
}

/// Ordered key/value set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyBag {
    values: BTreeMap<PropertyKey, PropertyValue>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: PropertyKey, value: PropertyValue) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: PropertyKey, value: PropertyValue) {
        self.values.insert(key, value);
    }

    pub fn get(&self, key: PropertyKey) -> Option<&PropertyValue> {
        self.values.get(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = PropertyKey> + '_ {
        self.values.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn manufacturer(&self) -> Option<&str> {
        match self.get(PropertyKey::ProviderManufacturer)? {
            PropertyValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn model(&self) -> Option<&str> {
        match self.get(PropertyKey::DeviceModel)? {
            PropertyValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn transport_type(&self) -> Option<TransportType> {
        match self.get(PropertyKey::DeviceTransportType)? {
            PropertyValue::TransportType(transport) => Some(*transport),
            _ => None,
        }
    }

    pub fn active_format_index(&self) -> Option<usize> {
        match self.get(PropertyKey::StreamActiveFormatIndex)? {
            PropertyValue::Index(index) => Some(*index),
            _ => None,
        }
    }

    pub fn frame_duration(&self) -> Option<FrameDuration> {
        match self.get(PropertyKey::StreamFrameDuration)? {
            PropertyValue::Duration(duration) => Some(*duration),
            _ => None,
        }
    }
}

/// Property access for one host-facing role (provider, device or stream)
pub trait PropertySource {
    /// Keys this role answers
    fn available_properties(&self) -> &'static [PropertyKey];

    /// Values for the requested keys this role knows; others are skipped
    fn query_properties(&self, keys: &[PropertyKey]) -> PropertyBag;

    /// Apply settable values; unknown or read-only keys are ignored
    fn set_properties(&self, bag: &PropertyBag) -> Result<()>;
}
