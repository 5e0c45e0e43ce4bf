//! Error types shared across capture, encode and transport paths

use thiserror::Error;

use crate::capture::PixelFormat;

/// Frame acquisition failures
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no frame available")]
    NoFrame,
    #[error("frame buffer pool exhausted ({capacity} buffers in use)")]
    PoolExhausted { capacity: usize },
    #[error("capture stream not started")]
    NotStarted,
    #[error("capture device error: {0}")]
    Device(#[from] std::io::Error),
    #[error("sensor JPEG encode failed: {0}")]
    SensorEncode(#[from] image::ImageError),
}

/// JPEG conversion failures
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame buffer holds {actual} bytes, expected {expected} for {format:?}")]
    InvalidLength {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
    #[error("unsupported pixel format: {0:?}")]
    Unsupported(PixelFormat),
    #[error("YUYV frame {width}x{height} has an odd pixel count")]
    UnpairedPixel { width: u32, height: u32 },
    #[error("JPEG encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("encode aborted by sink")]
    Aborted,
}

/// The response body can no longer accept bytes
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("response closed by peer")]
    Closed,
}

/// Sensor configuration failures
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("invalid frame size index {0}")]
    InvalidFrameSize(i32),
    #[error("quality {0} outside 0..=63")]
    InvalidQuality(i32),
    #[error("sensor device error: {0}")]
    Device(#[from] std::io::Error),
}

/// Failure of a capture or stream request
#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Rejected or failed control request
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("request has no query string")]
    MissingQuery,
    #[error("missing `{0}` parameter")]
    MissingParameter(&'static str),
    #[error("`{0}` parameter longer than {max} bytes", max = crate::handlers::control::MAX_TOKEN_LEN)]
    TokenTooLong(&'static str),
    #[error("unknown control variable `{0}`")]
    UnknownVariable(String),
    #[error(transparent)]
    Sensor(#[from] SensorError),
}
