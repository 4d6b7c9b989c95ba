//! Virtual capture device and its streaming state machine

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use flume::Sender;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument, warn};

use super::properties::{PropertyBag, PropertyKey, PropertySource, PropertyValue, TransportType};
use super::stream::VideoStream;
use super::{DeviceId, DeviceLookup, StreamId};
use crate::capture::FrameFormat;
use crate::error::Result;
use crate::host::{DeviceDescriptor, SampleSink};
use crate::pipeline::engine::{self, EngineStats, FrameEngine};
use crate::pipeline::{host_clock, Scheduler, Tick};
use crate::Config;

/// Ticks that may wait for the tick thread before the scheduler holds back
const TICK_QUEUE_DEPTH: usize = 2;

const DEVICE_PROPERTIES: &[PropertyKey] =
    &[PropertyKey::DeviceTransportType, PropertyKey::DeviceModel];

enum StreamingState {
    Idle,
    Streaming { refcount: u32, scheduler: Scheduler },
}

struct DeviceState {
    streaming: StreamingState,
    next_epoch: u64,
    shut_down: bool,
}

/// Counters for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStats {
    pub frames_emitted: u64,
    pub frames_dropped: u64,
    pub stale_ticks: u64,
}

/// Virtual camera device.
///
/// Frames are produced on a dedicated tick thread that owns the buffer pool
/// and the pattern generator. The device only arms and cancels the scheduler
/// feeding that thread, gated on the streaming refcount moving between zero
/// and non-zero.
pub struct VideoDevice {
    id: DeviceId,
    name: String,
    model: String,
    format: Arc<FrameFormat>,
    streams: Vec<VideoStream>,
    state: Mutex<DeviceState>,
    active_epoch: Arc<AtomicU64>,
    ticks: Sender<Tick>,
    exit: Sender<()>,
    runtime: Handle,
    stats: Arc<EngineStats>,
    tick_thread: Option<JoinHandle<()>>,
}

impl VideoDevice {
    /// Build the device, its single stream and its tick thread.
    ///
    /// Must be called from within the tokio runtime behind `runtime`.
    #[instrument(skip_all, fields(device = %config.device.name))]
    pub fn new(config: &Config, sink: Arc<dyn SampleSink>, runtime: Handle) -> Result<Self> {
        config.validate()?;

        let id = config.device.id.map(DeviceId).unwrap_or_default();
        let format = Arc::new(config.device.frame_format());
        let engine = FrameEngine::new(
            Arc::clone(&format),
            config.engine.pool_threshold,
            config.engine.stripe_height,
            sink,
            host_clock(),
        );
        let stats = engine.stats();

        let active_epoch = Arc::new(AtomicU64::new(0));
        let (ticks, tick_rx) = flume::bounded(TICK_QUEUE_DEPTH);
        let (exit, exit_rx) = flume::bounded(1);
        let tick_thread = engine::spawn_tick_thread(
            &config.device.name,
            engine,
            tick_rx,
            exit_rx,
            Arc::clone(&active_epoch),
            runtime.clone(),
            config.engine.pin_core,
        )?;

        let stream_id = config.stream.id.map(StreamId).unwrap_or_default();
        let stream = VideoStream::new(
            stream_id,
            id,
            config.stream.name.clone(),
            Arc::clone(&format),
        );

        info!(
            "Created device {} ({}): {}x{} {:?} @ {} fps, pool threshold {}",
            config.device.name,
            id,
            format.width,
            format.height,
            format.pixel_format,
            config.device.fps,
            config.engine.pool_threshold
        );

        Ok(Self {
            id,
            name: config.device.name.clone(),
            model: config.device.model.clone(),
            format,
            streams: vec![stream],
            state: Mutex::new(DeviceState {
                streaming: StreamingState::Idle,
                next_epoch: 1,
                shut_down: false,
            }),
            active_epoch,
            ticks,
            exit,
            runtime,
            stats,
            tick_thread: Some(tick_thread),
        })
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn format(&self) -> &Arc<FrameFormat> {
        &self.format
    }

    pub fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            id: self.id,
            name: self.name.clone(),
            model: self.model.clone(),
        }
    }

    pub fn streams(&self) -> &[VideoStream] {
        &self.streams
    }

    pub fn stream(&self, id: StreamId) -> Option<&VideoStream> {
        self.streams.iter().find(|stream| stream.id() == id)
    }

    /// Register a start request; arms the scheduler on the first one.
    #[instrument(skip(self), fields(device = %self.name))]
    pub fn start_streaming(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(crate::error::VcamError::ShutDown);
        }

        let previous = std::mem::replace(&mut state.streaming, StreamingState::Idle);
        state.streaming = match previous {
            StreamingState::Idle => {
                let epoch = state.next_epoch;
                state.next_epoch += 1;
                self.active_epoch.store(epoch, Ordering::Release);
                let scheduler = Scheduler::arm(
                    &self.runtime,
                    self.format.frame_interval(),
                    epoch,
                    host_clock(),
                    self.ticks.clone(),
                );
                info!("Streaming started");
                StreamingState::Streaming {
                    refcount: 1,
                    scheduler,
                }
            }
            StreamingState::Streaming {
                refcount,
                scheduler,
            } => {
                debug!("Streaming refcount {} -> {}", refcount, refcount + 1);
                StreamingState::Streaming {
                    refcount: refcount.saturating_add(1),
                    scheduler,
                }
            }
        };
        Ok(())
    }

    /// Drop a start request; cancels the scheduler when the last one goes.
    /// Without outstanding requests this does nothing.
    #[instrument(skip(self), fields(device = %self.name))]
    pub fn stop_streaming(&self) {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut state.streaming, StreamingState::Idle);
        state.streaming = match previous {
            StreamingState::Idle => StreamingState::Idle,
            StreamingState::Streaming {
                refcount,
                scheduler,
            } if refcount > 1 => {
                debug!("Streaming refcount {} -> {}", refcount, refcount - 1);
                StreamingState::Streaming {
                    refcount: refcount - 1,
                    scheduler,
                }
            }
            StreamingState::Streaming { scheduler, .. } => {
                self.active_epoch.store(0, Ordering::Release);
                scheduler.cancel();
                info!("Streaming stopped");
                StreamingState::Idle
            }
        };
    }

    /// Cancel any armed scheduler and refuse further starts. Idempotent.
    #[instrument(skip(self), fields(device = %self.name))]
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if let StreamingState::Streaming { scheduler, .. } =
            std::mem::replace(&mut state.streaming, StreamingState::Idle)
        {
            self.active_epoch.store(0, Ordering::Release);
            scheduler.cancel();
        }
        if !state.shut_down {
            state.shut_down = true;
            info!("Device shut down");
        }
    }

    pub fn streaming_refcount(&self) -> u32 {
        match self.state.lock().streaming {
            StreamingState::Idle => 0,
            StreamingState::Streaming { refcount, .. } => refcount,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state.lock().streaming, StreamingState::Streaming { .. })
    }

    /// Whether ticks are currently being accepted by the tick thread
    pub fn scheduler_armed(&self) -> bool {
        self.active_epoch.load(Ordering::Acquire) != 0
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Row the stripe will be drawn at in the next frame
    pub fn stripe_row(&self) -> u32 {
        self.stats.stripe_row()
    }

    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            frames_emitted: self.stats.frames_emitted(),
            frames_dropped: self.stats.frames_dropped(),
            stale_ticks: self.stats.stale_ticks(),
        }
    }
}

impl DeviceLookup for VideoDevice {
    fn device(&self, id: DeviceId) -> Option<&VideoDevice> {
        (id == self.id).then_some(self)
    }
}

impl PropertySource for VideoDevice {
    fn available_properties(&self) -> &'static [PropertyKey] {
        DEVICE_PROPERTIES
    }

    fn query_properties(&self, keys: &[PropertyKey]) -> PropertyBag {
        let mut bag = PropertyBag::new();
        for key in keys {
            match key {
                PropertyKey::DeviceTransportType => {
                    bag.insert(*key, PropertyValue::TransportType(TransportType::Virtual));
                }
                PropertyKey::DeviceModel => {
                    bag.insert(*key, PropertyValue::Text(self.model.clone()));
                }
                _ => {}
            }
        }
        bag
    }

    fn set_properties(&self, bag: &PropertyBag) -> Result<()> {
        for key in bag.keys() {
            debug!("Ignoring read-only device property {:?}", key);
        }
        Ok(())
    }
}

impl Drop for VideoDevice {
    fn drop(&mut self) {
        self.shutdown();
        let _ = self.exit.try_send(());
        if let Some(handle) = self.tick_thread.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Tick thread of {} panicked", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NullSink;
    use std::time::Duration;

    fn small_config() -> Config {
        let mut config = Config::default();
        config.device.width = 64;
        config.device.height = 32;
        config.engine.stripe_height = 4;
        config
    }

    fn device() -> VideoDevice {
        VideoDevice::new(&small_config(), Arc::new(NullSink), Handle::current())
            .expect("device should build")
    }

    #[tokio::test(start_paused = true)]
    async fn test_refcount_arms_and_cancels_once() {
        let device = device();
        assert!(!device.is_streaming());
        assert!(!device.scheduler_armed());

        device.start_streaming().expect("start should succeed");
        device.start_streaming().expect("start should succeed");
        device.start_streaming().expect("start should succeed");
        assert_eq!(device.streaming_refcount(), 3);
        assert!(device.scheduler_armed());

        device.stop_streaming();
        device.stop_streaming();
        assert_eq!(device.streaming_refcount(), 1);
        assert!(device.scheduler_armed());

        device.stop_streaming();
        assert_eq!(device.streaming_refcount(), 0);
        assert!(!device.is_streaming());
        assert!(!device.scheduler_armed());

        // Extra stop is a no-op
        device.stop_streaming();
        assert_eq!(device.streaming_refcount(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refcount_matches_start_minus_stop() {
        let device = device();
        for (starts, stops) in [(1u32, 0u32), (4, 2), (3, 3), (2, 5)] {
            for _ in 0..starts {
                device.start_streaming().expect("start should succeed");
            }
            for _ in 0..stops {
                device.stop_streaming();
                assert_eq!(device.scheduler_armed(), device.streaming_refcount() > 0);
            }
            let expected = starts.saturating_sub(stops);
            assert_eq!(device.streaming_refcount(), expected);
            assert_eq!(device.is_streaming(), expected > 0);
            assert_eq!(device.scheduler_armed(), expected > 0);
            while device.is_streaming() {
                device.stop_streaming();
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent() {
        let device = device();
        device.start_streaming().expect("start should succeed");
        device.shutdown();
        device.shutdown();
        assert!(device.is_shut_down());
        assert!(!device.scheduler_armed());
        assert_eq!(device.streaming_refcount(), 0);
        assert!(matches!(
            device.start_streaming(),
            Err(crate::error::VcamError::ShutDown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_joins_tick_thread() {
        let sink = Arc::new(NullSink);
        let device = VideoDevice::new(
            &small_config(),
            Arc::clone(&sink) as Arc<dyn SampleSink>,
            Handle::current(),
        )
        .expect("device should build");
        device.start_streaming().expect("start should succeed");
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The tick thread owns the engine, which holds the only other handle
        assert_eq!(Arc::strong_count(&sink), 2);
        drop(device);
        assert_eq!(Arc::strong_count(&sink), 1);
    }

    #[tokio::test]
    async fn test_device_properties() {
        let device = device();
        let bag = device.query_properties(&[
            PropertyKey::DeviceModel,
            PropertyKey::DeviceTransportType,
            PropertyKey::ProviderManufacturer,
        ]);
        assert_eq!(bag.len(), 2);
        assert_eq!(bag.model(), Some("SampleCapture Model"));
        assert_eq!(bag.transport_type(), Some(TransportType::Virtual));
        device
            .set_properties(&bag)
            .expect("setting device properties should be a no-op");
        assert_eq!(device.streams().len(), 1);
        assert!(device.stream(device.streams()[0].id()).is_some());
    }
}
