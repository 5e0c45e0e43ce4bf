//! Sensor configuration: frame size table, quality and status snapshot

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize, Serializer};

use crate::capture::PixelFormat;
use crate::error::SensorError;

/// Highest quality index the sensor accepts (lower is better)
pub const MAX_QUALITY: i32 = 63;

/// Sensor frame sizes, indexed the way the control page sends them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSize {
    R96x96,
    Qqvga,
    Qcif,
    Hqvga,
    R240x240,
    Qvga,
    Cif,
    Hvga,
    Vga,
    Svga,
    Xga,
    Hd,
    Sxga,
    Uxga,
}

impl FrameSize {
    const ALL: [FrameSize; 14] = [
        FrameSize::R96x96,
        FrameSize::Qqvga,
        FrameSize::Qcif,
        FrameSize::Hqvga,
        FrameSize::R240x240,
        FrameSize::Qvga,
        FrameSize::Cif,
        FrameSize::Hvga,
        FrameSize::Vga,
        FrameSize::Svga,
        FrameSize::Xga,
        FrameSize::Hd,
        FrameSize::Sxga,
        FrameSize::Uxga,
    ];

    pub fn from_index(index: i32) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    /// Width and height in pixels
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            FrameSize::R96x96 => (96, 96),
            FrameSize::Qqvga => (160, 120),
            FrameSize::Qcif => (176, 144),
            FrameSize::Hqvga => (240, 176),
            FrameSize::R240x240 => (240, 240),
            FrameSize::Qvga => (320, 240),
            FrameSize::Cif => (400, 296),
            FrameSize::Hvga => (480, 320),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Hd => (1280, 720),
            FrameSize::Sxga => (1280, 1024),
            FrameSize::Uxga => (1600, 1200),
        }
    }
}

fn serialize_index<S: Serializer>(size: &FrameSize, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u8(size.index())
}

/// Snapshot served by `/status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorStatus {
    #[serde(serialize_with = "serialize_index")]
    pub framesize: FrameSize,
    pub quality: u8,
}

/// Sensor-side configuration of a camera
pub trait Sensor: Send + Sync {
    fn pixel_format(&self) -> PixelFormat;

    fn status(&self) -> SensorStatus;

    fn set_framesize(&self, size: FrameSize) -> Result<(), SensorError>;

    fn set_quality(&self, quality: i32) -> Result<(), SensorError>;
}

/// Current sensor settings, swapped atomically so capture threads never block
/// on a control request
pub struct SensorSettings {
    format: PixelFormat,
    status: ArcSwap<SensorStatus>,
}

impl SensorSettings {
    pub fn new(format: PixelFormat, framesize: FrameSize, quality: u8) -> Self {
        Self {
            format,
            status: ArcSwap::from_pointee(SensorStatus { framesize, quality }),
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn load(&self) -> SensorStatus {
        **self.status.load()
    }

    pub fn store_framesize(&self, framesize: FrameSize) {
        self.status.rcu(|s| SensorStatus { framesize, ..**s });
    }

    /// Validate and store a quality value, returning it narrowed
    pub fn store_quality(&self, quality: i32) -> Result<u8, SensorError> {
        if !(0..=MAX_QUALITY).contains(&quality) {
            return Err(SensorError::InvalidQuality(quality));
        }
        let quality = quality as u8;
        self.status.rcu(|s| SensorStatus { quality, ..**s });
        Ok(quality)
    }
}

/// Map sensor quality (0 best, 63 worst) onto encoder quality (1..=100)
pub fn encoder_quality(quality: u8) -> u8 {
    let q = quality.min(MAX_QUALITY as u8) as u32;
    (100 - q * 99 / MAX_QUALITY as u32) as u8
}
