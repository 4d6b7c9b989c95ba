use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, error, info, instrument};

use super::properties::{PropertyBag, PropertyKey, PropertySource, PropertyValue};
use super::{DeviceId, DeviceLookup, StreamId, VideoDevice, VideoStream};
use crate::error::{Result, VcamError};
use crate::host::{ClientInfo, HostRegistry, SampleSink};
use crate::Config;

const PROVIDER_PROPERTIES: &[PropertyKey] = &[PropertyKey::ProviderManufacturer];

/// Top-level object published to the host; owns the devices
pub struct Provider {
    manufacturer: String,
    devices: Vec<VideoDevice>,
}

impl Provider {
    /// Build the device and publish it with its streams.
    ///
    /// Registration failure is returned as an error; the caller is expected
    /// to abort startup.
    #[instrument(skip_all)]
    pub fn new(
        config: &Config,
        registry: &dyn HostRegistry,
        sink: Arc<dyn SampleSink>,
        runtime: Handle,
    ) -> Result<Self> {
        let device = VideoDevice::new(config, sink, runtime)?;

        if let Err(e) = registry.register_device(&device.descriptor()) {
            error!("Failed to add device {}: {}", device.name(), e);
            return Err(e.into());
        }
        for stream in device.streams() {
            if let Err(e) = registry.add_stream(&stream.descriptor()) {
                error!("Failed to add stream {}: {}", stream.name(), e);
                device.shutdown();
                return Err(e.into());
            }
        }

        info!("Provider ready with device {}", device.name());
        Ok(Self {
            manufacturer: config.provider.manufacturer.clone(),
            devices: vec![device],
        })
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    pub fn devices(&self) -> &[VideoDevice] {
        &self.devices
    }

    pub fn stream(&self, id: StreamId) -> Option<&VideoStream> {
        self.devices.iter().find_map(|device| device.stream(id))
    }

    /// Start `stream` on behalf of `client`, after the admission hook agrees
    pub fn start_stream(&self, id: StreamId, client: &ClientInfo) -> Result<()> {
        let stream = self
            .stream(id)
            .ok_or_else(|| VcamError::UnknownStream(id.to_string()))?;
        if !stream.authorized_to_start_stream(client) {
            return Err(VcamError::NotAuthorized(client.id.to_string()));
        }
        stream.start_stream(self)
    }

    pub fn stop_stream(&self, id: StreamId) -> Result<()> {
        let stream = self
            .stream(id)
            .ok_or_else(|| VcamError::UnknownStream(id.to_string()))?;
        stream.stop_stream(self)
    }

    /// Client session opened. No state is kept per client.
    pub fn connect(&self, client: &ClientInfo) -> Result<()> {
        debug!("Client connected: {} (pid {:?})", client.id, client.pid);
        Ok(())
    }

    pub fn disconnect(&self, client: &ClientInfo) {
        debug!("Client disconnected: {}", client.id);
    }

    /// Cancel every armed scheduler. Safe to call more than once.
    pub fn shutdown_all_devices(&self) {
        for device in &self.devices {
            device.shutdown();
        }
    }
}

impl DeviceLookup for Provider {
    fn device(&self, id: DeviceId) -> Option<&VideoDevice> {
        self.devices.iter().find(|device| device.id() == id)
    }
}

impl PropertySource for Provider {
    fn available_properties(&self) -> &'static [PropertyKey] {
        PROVIDER_PROPERTIES
    }

    fn query_properties(&self, keys: &[PropertyKey]) -> PropertyBag {
        let mut bag = PropertyBag::new();
        if keys.contains(&PropertyKey::ProviderManufacturer) {
            bag.insert(
                PropertyKey::ProviderManufacturer,
                PropertyValue::Text(self.manufacturer.clone()),
            );
        }
        bag
    }

    fn set_properties(&self, bag: &PropertyBag) -> Result<()> {
        for key in bag.keys() {
            debug!("Ignoring read-only provider property {:?}", key);
        }
        Ok(())
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        self.shutdown_all_devices();
    }
}
