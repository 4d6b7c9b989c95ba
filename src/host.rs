//! Interfaces the engine consumes from the host, plus in-process implementations
//!
//! The host registry publishes devices and streams; the sample sink receives
//! every frame the device produces. Both are traits so the engine never
//! depends on a particular host plugin protocol.

use std::collections::HashMap;
use std::fmt;

use flume::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::capture::{Discontinuity, TimestampedSample};
use crate::device::{DeviceId, StreamDirection, StreamId};
use crate::error::RegistrationError;

/// What the host learns about a device when it is registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub name: String,
    pub model: String,
}

/// What the host learns about a stream when it is added
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub id: StreamId,
    pub device: DeviceId,
    pub name: String,
    pub direction: StreamDirection,
}

/// Host-side object registry
pub trait HostRegistry: Send + Sync {
    fn register_device(&self, device: &DeviceDescriptor) -> Result<(), RegistrationError>;

    fn add_stream(&self, stream: &StreamDescriptor) -> Result<(), RegistrationError>;
}

/// Receiver of produced samples. One-way: the engine never observes a result.
pub trait SampleSink: Send + Sync {
    fn emit(&self, sample: TimestampedSample, discontinuity: Discontinuity, host_time_nanos: u64);
}

/// Identity of a host client (an application opening the camera)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client details passed to connect/disconnect and admission hooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub pid: Option<u32>,
}

impl ClientInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: ClientId(id.into()),
            pid: None,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    devices: HashMap<DeviceId, DeviceDescriptor>,
    streams: HashMap<StreamId, StreamDescriptor>,
    rejection: Option<String>,
}

/// In-process registry: tracks what was published and rejects id collisions
#[derive(Default)]
pub struct LocalRegistry {
    state: Mutex<RegistryState>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that refuses everything with `reason`
    pub fn rejecting(reason: impl Into<String>) -> Self {
        let registry = Self::default();
        registry.state.lock().rejection = Some(reason.into());
        registry
    }

    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.state.lock().devices.values().cloned().collect()
    }

    pub fn streams(&self) -> Vec<StreamDescriptor> {
        self.state.lock().streams.values().cloned().collect()
    }
}

impl HostRegistry for LocalRegistry {
    fn register_device(&self, device: &DeviceDescriptor) -> Result<(), RegistrationError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.rejection {
            return Err(RegistrationError::Rejected(reason.clone()));
        }
        if state.devices.contains_key(&device.id) {
            return Err(RegistrationError::DuplicateDevice(device.id.to_string()));
        }
        info!("Registered device {} ({})", device.name, device.id);
        state.devices.insert(device.id, device.clone());
        Ok(())
    }

    fn add_stream(&self, stream: &StreamDescriptor) -> Result<(), RegistrationError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.rejection {
            return Err(RegistrationError::Rejected(reason.clone()));
        }
        if !state.devices.contains_key(&stream.device) {
            return Err(RegistrationError::UnknownDevice(stream.device.to_string()));
        }
        if state.streams.contains_key(&stream.id) {
            return Err(RegistrationError::DuplicateStream(stream.id.to_string()));
        }
        info!("Added stream {} ({}) to device {}", stream.name, stream.id, stream.device);
        state.streams.insert(stream.id, stream.clone());
        Ok(())
    }
}

/// A sample as handed over by [`ChannelSink`]
#[derive(Debug)]
pub struct Delivery {
    pub sample: TimestampedSample,
    pub discontinuity: Discontinuity,
    pub host_time_nanos: u64,
}

/// Sink that forwards samples over a flume channel.
///
/// A full or disconnected channel drops the sample, which returns its buffer
/// to the pool straight away.
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<Delivery>,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<Delivery>) {
        let (tx, rx) = flume::bounded(capacity);
        (Self { tx }, rx)
    }

    pub fn unbounded() -> (Self, Receiver<Delivery>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }
}

impl SampleSink for ChannelSink {
    fn emit(&self, sample: TimestampedSample, discontinuity: Discontinuity, host_time_nanos: u64) {
        let delivery = Delivery {
            sample,
            discontinuity,
            host_time_nanos,
        };
        match self.tx.try_send(delivery) {
            Ok(()) => {}
            Err(TrySendError::Full(delivery)) => {
                trace!("Sink full, dropping sample {}", delivery.sample.sequence);
            }
            Err(TrySendError::Disconnected(delivery)) => {
                debug!("Sink disconnected, dropping sample {}", delivery.sample.sequence);
            }
        }
    }
}

/// Sink that discards every sample
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl SampleSink for NullSink {
    fn emit(&self, _sample: TimestampedSample, _discontinuity: Discontinuity, _host_time_nanos: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: DeviceId::new(),
            name: name.into(),
            model: "model".into(),
        }
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let registry = LocalRegistry::new();
        let cam = device("cam");
        registry.register_device(&cam).expect("register should succeed");
        assert_eq!(
            registry.register_device(&cam),
            Err(RegistrationError::DuplicateDevice(cam.id.to_string()))
        );

        let stream = StreamDescriptor {
            id: StreamId::new(),
            device: cam.id,
            name: "video".into(),
            direction: StreamDirection::Source,
        };
        registry.add_stream(&stream).expect("add_stream should succeed");
        assert!(matches!(
            registry.add_stream(&stream),
            Err(RegistrationError::DuplicateStream(_))
        ));
        assert_eq!(registry.devices().len(), 1);
        assert_eq!(registry.streams().len(), 1);
    }

    #[test]
    fn test_registry_requires_known_device() {
        let registry = LocalRegistry::new();
        let stream = StreamDescriptor {
            id: StreamId::new(),
            device: DeviceId::new(),
            name: "video".into(),
            direction: StreamDirection::Source,
        };
        assert!(matches!(
            registry.add_stream(&stream),
            Err(RegistrationError::UnknownDevice(_))
        ));
    }

    #[test]
    fn test_rejecting_registry() {
        let registry = LocalRegistry::rejecting("not entitled");
        assert_eq!(
            registry.register_device(&device("cam")),
            Err(RegistrationError::Rejected("not entitled".into()))
        );
    }
}
