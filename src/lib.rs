//! Virtual camera engine: pooled frame buffers, a strict-cadence tick
//! scheduler and a refcounted start/stop state machine, exposed to a host
//! through provider, device and stream objects.

pub mod capture;
pub mod device;
pub mod error;
pub mod host;
pub mod pipeline;
pub mod utils;

use std::path::Path;

use arc_swap::ArcSwap;
use capture::{FrameFormat, PixelFormat};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use capture::{Discontinuity, FrameBuffer, FramePool, StripeSynthesizer, TimestampedSample};
pub use device::{Provider, VideoDevice, VideoStream};
pub use error::{RegistrationError, Result, VcamError};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "VIRTUCAM";

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    pub stream: StreamConfig,
    pub provider: ProviderConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Fixed device identity; a random one is generated when absent
    pub id: Option<Uuid>,
    pub name: String,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
}

impl DeviceConfig {
    pub fn frame_format(&self) -> FrameFormat {
        FrameFormat::fixed_rate(self.width, self.height, self.format, self.fps)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub id: Option<Uuid>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub manufacturer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum buffers outstanding before ticks are skipped
    pub pool_threshold: usize,
    pub stripe_height: u32,
    /// CPU core for the tick thread
    pub pin_core: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                id: None,
                name: "SampleCapture (Rust)".into(),
                model: "SampleCapture Model".into(),
                width: 1920,
                height: 1080,
                fps: 60,
                format: PixelFormat::Bgra32,
            },
            stream: StreamConfig {
                id: None,
                name: "SampleCapture.Video".into(),
            },
            provider: ProviderConfig {
                manufacturer: "SampleCapture Manufacturer".into(),
            },
            engine: EngineConfig {
                pool_threshold: capture::pool::DEFAULT_POOL_THRESHOLD,
                stripe_height: capture::synth::DEFAULT_STRIPE_HEIGHT,
                pin_core: None,
            },
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `VIRTUCAM__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values no device can run with
    pub fn validate(&self) -> Result<()> {
        let device = &self.device;
        if device.width == 0 || device.height == 0 {
            return Err(VcamError::InvalidConfig(format!(
                "frame size {}x{} is empty",
                device.width, device.height
            )));
        }
        if device.format != PixelFormat::Bgra32 {
            return Err(VcamError::InvalidConfig(format!(
                "pixel format {:?} is not supported, only Bgra32",
                device.format
            )));
        }
        if device.fps == 0 {
            return Err(VcamError::InvalidConfig("fps must be positive".into()));
        }
        if self.engine.stripe_height == 0 || self.engine.stripe_height >= device.height {
            return Err(VcamError::InvalidConfig(format!(
                "stripe height {} must be in 1..{}",
                self.engine.stripe_height, device.height
            )));
        }
        if self.engine.pool_threshold == 0 {
            return Err(VcamError::InvalidConfig(
                "pool threshold must be positive".into(),
            ));
        }
        Ok(())
    }
}
