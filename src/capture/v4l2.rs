//! V4L2 camera capture into pooled frame buffers

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control, Value};
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::sensor::{encoder_quality, FrameSize, Sensor, SensorSettings, SensorStatus};
use crate::capture::{BufferPool, FrameSource};
use crate::error::{CaptureError, SensorError};
use crate::CaptureConfig;

const V4L2_CID_JPEG_COMPRESSION_QUALITY: u32 = 0x009d_0903;

/// Device state guarded by one lock, so captures never interleave
struct V4l2State {
    device: Device,
    stream: Option<MmapStream<'static>>,
    applied: Option<FrameSize>,
    width: u32,
    height: u32,
}

/// V4L2 camera exposed as a frame source and sensor
pub struct V4l2Capture {
    state: Mutex<V4l2State>,
    settings: SensorSettings,
    pool: BufferPool,
    buffer_count: u32,
    sequence: AtomicU64,
}

pub fn fourcc(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Jpeg => FourCC::new(b"MJPG"),
        PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
        PixelFormat::Bgr24 => FourCC::new(b"BGR3"),
        PixelFormat::Rgb565 => FourCC::new(b"RGBP"),
        PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
        PixelFormat::Grayscale => FourCC::new(b"GREY"),
    }
}

impl V4l2Capture {
    /// Open the configured device. Streaming starts on the first acquisition.
    pub fn new(config: &CaptureConfig) -> Result<Self, CaptureError> {
        info!("Initializing V4L2 capture: {}", config.device);

        let device = Device::with_path(&config.device)?;

        // Query capabilities
        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::Device(io::Error::new(
                io::ErrorKind::Unsupported,
                "device doesn't support video capture",
            )));
        }

        let (width, height) = config.framesize.dimensions();
        let buffer_size = config
            .format
            .frame_len(width, height)
            .unwrap_or((width * height) as usize / 4);

        Ok(Self {
            state: Mutex::new(V4l2State {
                device,
                stream: None,
                applied: None,
                width,
                height,
            }),
            settings: SensorSettings::new(config.format, config.framesize, config.quality),
            pool: BufferPool::new(config.buffer_count as usize, buffer_size)
                .with_wait(Duration::from_millis(config.buffer_wait_ms)),
            buffer_count: config.buffer_count,
            sequence: AtomicU64::new(0),
        })
    }

    /// (Re)negotiate the format and start a fresh mmap stream
    fn configure(&self, state: &mut V4l2State, size: FrameSize) -> Result<(), CaptureError> {
        // Buffers must be released before the format can change
        state.stream = None;

        let format = self.settings.format();
        let (width, height) = size.dimensions();

        let mut fmt = state.device.format()?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = fourcc(format);
        let actual = state.device.set_format(&fmt)?;

        if actual.fourcc != fmt.fourcc {
            return Err(CaptureError::Device(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("device refused {:?} ({})", format, fmt.fourcc),
            )));
        }
        if (actual.width, actual.height) != (width, height) {
            warn!(
                "Requested {}x{}, device chose {}x{}",
                width, height, actual.width, actual.height
            );
        }

        let stream =
            MmapStream::with_buffers(&state.device, Type::VideoCapture, self.buffer_count)?;

        state.stream = Some(stream);
        state.applied = Some(size);
        state.width = actual.width;
        state.height = actual.height;
        info!(
            "Capture stream started: {}x{} {} with {} buffers",
            actual.width, actual.height, actual.fourcc, self.buffer_count
        );
        Ok(())
    }
}

impl FrameSource for V4l2Capture {
    #[instrument(skip(self))]
    fn acquire(&self) -> Result<Frame, CaptureError> {
        let timestamp = Instant::now();

        // Wait for a buffer before taking the device lock
        let mut data = self.pool.take().ok_or(CaptureError::PoolExhausted {
            capacity: self.pool.capacity(),
        })?;

        let Ok(mut state) = self.state.lock() else {
            self.pool.give_back(data);
            return Err(CaptureError::NotStarted);
        };

        let wanted = self.settings.load().framesize;
        if state.applied != Some(wanted) {
            if let Err(e) = self.configure(&mut state, wanted) {
                self.pool.give_back(data);
                return Err(e);
            }
        }

        let (width, height) = (state.width, state.height);
        let Some(stream) = state.stream.as_mut() else {
            self.pool.give_back(data);
            return Err(CaptureError::NotStarted);
        };

        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) => {
                self.pool.give_back(data);
                return Err(e.into());
            }
        };

        // MJPEG frames only fill part of the mmap buffer
        let used = (meta.bytesused as usize).min(buf.len());
        data.extend_from_slice(&buf[..used]);
        let device_timestamp = Duration::from_secs(meta.timestamp.sec as u64)
            + Duration::from_micros(meta.timestamp.usec as u64);

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let frame_meta = Arc::new(FrameMetadata {
            sequence,
            width,
            height,
            stride: width,
            format: self.settings.format(),
            device_timestamp: Some(device_timestamp),
        });

        Ok(Frame {
            data,
            meta: frame_meta,
            timestamp,
        })
    }

    fn release(&self, frame: Frame) {
        self.pool.give_back(frame.data);
    }
}

impl Sensor for V4l2Capture {
    fn pixel_format(&self) -> PixelFormat {
        self.settings.format()
    }

    fn status(&self) -> SensorStatus {
        self.settings.load()
    }

    /// Takes effect at the next acquisition, which restarts the stream
    fn set_framesize(&self, size: FrameSize) -> Result<(), SensorError> {
        self.settings.store_framesize(size);
        Ok(())
    }

    fn set_quality(&self, quality: i32) -> Result<(), SensorError> {
        let previous = self.settings.load().quality;
        let quality = self.settings.store_quality(quality)?;

        let state = self
            .state
            .lock()
            .map_err(|_| SensorError::Device(io::ErrorKind::Other.into()))?;
        let control = Control {
            id: V4L2_CID_JPEG_COMPRESSION_QUALITY,
            value: Value::Integer(i64::from(encoder_quality(quality))),
        };
        if let Err(e) = state.device.set_control(control) {
            // Keep status truthful when the device rejects it
            let _ = self.settings.store_quality(i32::from(previous));
            return Err(e.into());
        }
        Ok(())
    }
}
