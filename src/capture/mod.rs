pub mod frame;
pub mod pattern;
pub mod pool;
pub mod sensor;
pub mod v4l2;

pub use frame::Frame;
pub use frame::FrameMetadata;
pub use frame::PixelFormat;
pub use pattern::TestPatternSource;
pub use pool::BufferPool;
pub use sensor::{FrameSize, Sensor, SensorSettings, SensorStatus};
pub use v4l2::V4l2Capture;

use crate::error::CaptureError;

/// Produces frames on demand from a fixed buffer pool
pub trait FrameSource: Send + Sync {
    /// Block until a frame is captured
    fn acquire(&self) -> Result<Frame, CaptureError>;

    /// Hand a frame's buffer back to the pool
    fn release(&self, frame: Frame);
}
