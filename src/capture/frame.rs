use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A captured image backed by a pool-owned buffer.
///
/// Frames are not clonable: whoever holds one must hand it back through
/// [`FrameSource::release`](super::FrameSource::release) exactly once, or the
/// buffer never returns to the pool.
#[must_use = "frames must be released back to their source"]
pub struct Frame {
    /// Pool buffer holding the image bytes
    pub data: BytesMut,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_jpeg(&self) -> bool {
        self.meta.format == PixelFormat::Jpeg
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("meta", &self.meta)
            .finish()
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Already-encoded JPEG, sent as is
    Jpeg,
    Rgb24,
    Bgr24,
    /// 16-bit 5-6-5, high byte first
    Rgb565,
    Yuyv4,
    Grayscale,
}

impl PixelFormat {
    /// Bytes per pixel for raw formats, `None` for JPEG
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Jpeg => None,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Rgb565 | PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Grayscale => Some(1),
        }
    }

    /// Exact buffer length of a raw frame
    pub fn frame_len(self, width: u32, height: u32) -> Option<usize> {
        self.bytes_per_pixel()
            .map(|bpp| width as usize * height as usize * bpp)
    }
}
