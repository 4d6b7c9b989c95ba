//! Host-facing objects: provider, device and stream
//!
//! The provider owns devices, each device owns its streams. A stream refers
//! back to its device only by [`DeviceId`], resolved through a
//! [`DeviceLookup`] when the stream is started or stopped.

pub mod device;
pub mod properties;
pub mod provider;
pub mod stream;

use std::fmt;

use uuid::Uuid;

pub use device::{DeviceStats, VideoDevice};
pub use properties::{PropertyBag, PropertyKey, PropertySource, PropertyValue, TransportType};
pub use provider::Provider;
pub use stream::VideoStream;

/// Identity of a device as published to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a stream as published to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Direction of a stream relative to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    /// Device produces samples for the host
    Source,
}

/// Clock the stream's presentation timestamps are expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockType {
    HostTime,
}

/// Resolves a device id to the device that owns it
pub trait DeviceLookup {
    fn device(&self, id: DeviceId) -> Option<&VideoDevice>;
}
