pub mod frame;
pub mod pool;
pub mod synth;

pub use frame::{
    Discontinuity, FrameDuration, FrameFormat, HostTime, PixelFormat, TimestampedSample,
};
pub use pool::{FrameBuffer, FramePool};
pub use synth::StripeSynthesizer;
