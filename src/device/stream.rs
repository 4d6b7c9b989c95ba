use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::properties::{PropertyBag, PropertyKey, PropertySource, PropertyValue};
use super::{ClockType, DeviceId, DeviceLookup, StreamDirection, StreamId};
use crate::capture::FrameFormat;
use crate::error::{Result, VcamError};
use crate::host::{ClientInfo, StreamDescriptor};

const STREAM_PROPERTIES: &[PropertyKey] = &[
    PropertyKey::StreamActiveFormatIndex,
    PropertyKey::StreamFrameDuration,
];

/// Capture endpoint the host opens. Start and stop are forwarded to the
/// owning device.
#[derive(Debug)]
pub struct VideoStream {
    id: StreamId,
    device: DeviceId,
    name: String,
    formats: Vec<Arc<FrameFormat>>,
    active_format: AtomicUsize,
}

impl VideoStream {
    pub fn new(id: StreamId, device: DeviceId, name: String, format: Arc<FrameFormat>) -> Self {
        Self {
            id,
            device,
            name,
            formats: vec![format],
            active_format: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn device_id(&self) -> DeviceId {
        self.device
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> StreamDirection {
        StreamDirection::Source
    }

    pub fn clock_type(&self) -> ClockType {
        ClockType::HostTime
    }

    pub fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor {
            id: self.id,
            device: self.device,
            name: self.name.clone(),
            direction: self.direction(),
        }
    }

    /// Supported formats; always exactly one
    pub fn formats(&self) -> &[Arc<FrameFormat>] {
        &self.formats
    }

    pub fn active_format_index(&self) -> usize {
        self.active_format.load(Ordering::Acquire)
    }

    pub fn active_format(&self) -> Arc<FrameFormat> {
        let index = self.active_format_index().min(self.formats.len() - 1);
        Arc::clone(&self.formats[index])
    }

    /// Select the active format. Indices outside the format list are
    /// rejected and leave the current selection untouched.
    pub fn set_active_format_index(&self, index: usize) -> Result<()> {
        if index >= self.formats.len() {
            warn!("Invalid format index {} for stream {}", index, self.name);
            return Err(VcamError::InvalidFormatIndex {
                index,
                count: self.formats.len(),
            });
        }
        self.active_format.store(index, Ordering::Release);
        Ok(())
    }

    /// Admission hook; every client is currently allowed
    pub fn authorized_to_start_stream(&self, client: &ClientInfo) -> bool {
        debug!("Client {} asks to start stream {}", client.id, self.name);
        true
    }

    pub fn start_stream(&self, devices: &impl DeviceLookup) -> Result<()> {
        self.owner(devices)?.start_streaming()
    }

    pub fn stop_stream(&self, devices: &impl DeviceLookup) -> Result<()> {
        self.owner(devices)?.stop_streaming();
        Ok(())
    }

    fn owner<'a>(&self, devices: &'a impl DeviceLookup) -> Result<&'a super::VideoDevice> {
        devices
            .device(self.device)
            .ok_or_else(|| VcamError::UnknownDevice(self.device.to_string()))
    }
}

impl PropertySource for VideoStream {
    fn available_properties(&self) -> &'static [PropertyKey] {
        STREAM_PROPERTIES
    }

    fn query_properties(&self, keys: &[PropertyKey]) -> PropertyBag {
        let mut bag = PropertyBag::new();
        for key in keys {
            match key {
                PropertyKey::StreamActiveFormatIndex => {
                    bag.insert(*key, PropertyValue::Index(self.active_format_index()));
                }
                PropertyKey::StreamFrameDuration => {
                    let duration = self.active_format().min_frame_duration;
                    bag.insert(*key, PropertyValue::Duration(duration));
                }
                _ => {}
            }
        }
        bag
    }

    fn set_properties(&self, bag: &PropertyBag) -> Result<()> {
        for key in bag.keys() {
            match key {
                PropertyKey::StreamActiveFormatIndex => {
                    if let Some(index) = bag.active_format_index() {
                        self.set_active_format_index(index)?;
                    }
                }
                other => debug!("Ignoring read-only or foreign property {:?}", other),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameDuration, PixelFormat};

    fn stream() -> VideoStream {
        let format = Arc::new(FrameFormat::fixed_rate(640, 480, PixelFormat::Bgra32, 30));
        VideoStream::new(StreamId::new(), DeviceId::new(), "test.video".into(), format)
    }

    #[test]
    fn test_single_format() {
        let stream = stream();
        assert_eq!(stream.formats().len(), 1);
        assert_eq!(stream.active_format_index(), 0);
        assert_eq!(stream.active_format().width, 640);
        assert_eq!(stream.direction(), StreamDirection::Source);
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let stream = stream();
        stream.set_active_format_index(0).expect("index 0 should be accepted");
        let err = stream.set_active_format_index(1).expect_err("index 1 should be rejected");
        assert!(matches!(err, VcamError::InvalidFormatIndex { index: 1, count: 1 }));
        assert_eq!(stream.active_format_index(), 0);
    }

    #[test]
    fn test_query_properties() {
        let stream = stream();
        let bag = stream.query_properties(&[
            PropertyKey::StreamFrameDuration,
            PropertyKey::StreamActiveFormatIndex,
            PropertyKey::DeviceModel,
        ]);
        assert_eq!(bag.len(), 2);
        assert_eq!(bag.active_format_index(), Some(0));
        assert_eq!(bag.frame_duration(), Some(FrameDuration::from_fps(30)));
    }

    #[test]
    fn test_set_properties() {
        let stream = stream();
        let ok = PropertyBag::new()
            .with(PropertyKey::StreamActiveFormatIndex, PropertyValue::Index(0))
            .with(
                PropertyKey::StreamFrameDuration,
                PropertyValue::Duration(FrameDuration::from_fps(5)),
            );
        stream.set_properties(&ok).expect("valid bag should apply");
        assert_eq!(
            stream.query_properties(&[PropertyKey::StreamFrameDuration]).frame_duration(),
            Some(FrameDuration::from_fps(30))
        );

        let bad = PropertyBag::new().with(PropertyKey::StreamActiveFormatIndex, PropertyValue::Index(4));
        assert!(stream.set_properties(&bad).is_err());
    }

    #[test]
    fn test_start_without_owner_fails() {
        struct NoDevices;
        impl DeviceLookup for NoDevices {
            fn device(&self, _id: DeviceId) -> Option<&crate::device::VideoDevice> {
                None
            }
        }

        let stream = stream();
        assert!(matches!(
            stream.start_stream(&NoDevices),
            Err(VcamError::UnknownDevice(_))
        ));
        assert!(stream.authorized_to_start_stream(&ClientInfo::new("app")));
    }
}
