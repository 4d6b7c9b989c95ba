use serde::{Deserialize, Serialize};
use std::ops::BitOr;
use std::sync::Arc;
use std::time::Duration;

use super::pool::FrameBuffer;

/// Row strides are padded to this many bytes
pub const ROW_ALIGNMENT: usize = 64;

/// Pixel formats we know about. Frames are only synthesized as `Bgra32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Bgra32,
    Rgb24,
    Yuyv4,
    Nv12,
}

impl PixelFormat {
    /// Bytes per pixel in the first plane
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra32 => 4,
            PixelFormat::Rgb24 => 3,
            PixelFormat::Yuyv4 => 2,
            PixelFormat::Nv12 => 1,
        }
    }

    pub fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Bgra32 => *b"BGRA",
            PixelFormat::Rgb24 => *b"RGB3",
            PixelFormat::Yuyv4 => *b"YUYV",
            PixelFormat::Nv12 => *b"NV12",
        }
    }
}

/// Rational frame duration, `value / timescale` seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDuration {
    pub value: u32,
    pub timescale: u32,
}

impl FrameDuration {
    /// Duration of one frame at `fps` frames per second
    pub fn from_fps(fps: u32) -> Self {
        Self {
            value: 1,
            timescale: fps,
        }
    }

    pub fn as_nanos(self) -> u64 {
        if self.timescale == 0 {
            return 0;
        }
        u64::from(self.value) * 1_000_000_000 / u64::from(self.timescale)
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_nanos(self.as_nanos())
    }
}

/// Negotiated video format. Immutable once a device is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub min_frame_duration: FrameDuration,
    pub max_frame_duration: FrameDuration,
}

impl FrameFormat {
    /// Fixed-rate format: min and max frame duration are both `1/fps`
    pub fn fixed_rate(width: u32, height: u32, pixel_format: PixelFormat, fps: u32) -> Self {
        let duration = FrameDuration::from_fps(fps);
        Self {
            width,
            height,
            pixel_format,
            min_frame_duration: duration,
            max_frame_duration: duration,
        }
    }

    /// Tightly packed bytes of one row
    pub fn packed_row_bytes(&self) -> usize {
        self.width as usize * self.pixel_format.bytes_per_pixel()
    }

    /// Bytes per row including alignment padding
    pub fn row_stride(&self) -> usize {
        self.packed_row_bytes().div_ceil(ROW_ALIGNMENT) * ROW_ALIGNMENT
    }

    pub fn frame_size(&self) -> usize {
        self.row_stride() * self.height as usize
    }

    /// Interval between ticks at the fastest allowed rate
    pub fn frame_interval(&self) -> Duration {
        self.min_frame_duration.as_duration()
    }
}

/// Presentation time on the host monotonic clock, in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HostTime(pub u64);

impl HostTime {
    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    pub fn saturating_sub(self, earlier: HostTime) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

/// Discontinuity flags handed to the sink with each sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Discontinuity(u32);

impl Discontinuity {
    pub const NONE: Self = Self(0);
    /// One or more ticks before this sample produced no frame
    pub const SAMPLE_DROPPED: Self = Self(1 << 0);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Discontinuity {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One delivered frame. Dropping it hands the buffer back to its pool.
pub struct TimestampedSample {
    pub buffer: FrameBuffer,
    /// Tick number since the scheduler was armed
    pub sequence: u64,
    pub presentation_time: HostTime,
    pub format: Arc<FrameFormat>,
}

impl std::fmt::Debug for TimestampedSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampedSample")
            .field("sequence", &self.sequence)
            .field("presentation_time", &self.presentation_time)
            .field("width", &self.format.width)
            .field("height", &self.format.height)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_is_aligned() {
        let format = FrameFormat::fixed_rate(1920, 1080, PixelFormat::Bgra32, 60);
        assert_eq!(format.packed_row_bytes(), 7680);
        assert_eq!(format.row_stride(), 7680);

        let odd = FrameFormat::fixed_rate(33, 4, PixelFormat::Bgra32, 60);
        assert_eq!(odd.packed_row_bytes(), 132);
        assert_eq!(odd.row_stride(), 192);
        assert_eq!(odd.frame_size(), 192 * 4);
    }

    #[test]
    fn test_frame_duration() {
        let d = FrameDuration::from_fps(60);
        assert_eq!(d.as_nanos(), 16_666_666);
        assert_eq!(FrameDuration::from_fps(0).as_nanos(), 0);
    }

    #[test]
    fn test_discontinuity_flags() {
        let flags = Discontinuity::NONE | Discontinuity::SAMPLE_DROPPED;
        assert!(flags.contains(Discontinuity::SAMPLE_DROPPED));
        assert!(flags.contains(Discontinuity::NONE));
        assert!(!Discontinuity::NONE.contains(Discontinuity::SAMPLE_DROPPED));
        assert!(Discontinuity::default().is_empty());
    }
}
