//! Synthetic camera producing moving colour bars

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::{info, instrument};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::sensor::{encoder_quality, FrameSize, Sensor, SensorSettings, SensorStatus};
use crate::capture::{BufferPool, FrameSource};
use crate::error::{CaptureError, SensorError};
use crate::CaptureConfig;

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

/// Camera stand-in for hosts without capture hardware
pub struct TestPatternSource {
    settings: SensorSettings,
    pool: BufferPool,
    sequence: AtomicU64,
    frame_interval: Option<Duration>,
    last_frame: Mutex<Option<Instant>>,
}

impl TestPatternSource {
    pub fn new(config: &CaptureConfig) -> Self {
        let (width, height) = config.framesize.dimensions();
        let buffer_size = config
            .format
            .frame_len(width, height)
            .unwrap_or((width * height) as usize / 4);

        info!(
            "Test pattern source: {:?} {}x{} with {} buffers",
            config.format, width, height, config.buffer_count
        );

        Self {
            settings: SensorSettings::new(config.format, config.framesize, config.quality),
            pool: BufferPool::new(config.buffer_count as usize, buffer_size)
                .with_wait(Duration::from_millis(config.buffer_wait_ms)),
            sequence: AtomicU64::new(0),
            frame_interval: (config.fps > 0)
                .then(|| Duration::from_secs_f64(1.0 / f64::from(config.fps))),
            last_frame: Mutex::new(None),
        }
    }

    /// Free pool buffers
    pub fn available_buffers(&self) -> usize {
        self.pool.available()
    }

    /// Block until the next frame is due
    fn pace(&self) {
        let Some(interval) = self.frame_interval else {
            return;
        };
        let Ok(mut last) = self.last_frame.lock() else {
            return;
        };
        if let Some(due) = last.map(|t| t + interval) {
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        *last = Some(Instant::now());
    }
}

/// Colour of pixel `x` with the bars scrolled by `offset`
fn bar_colour(x: u32, width: u32, offset: u64) -> [u8; 3] {
    let bar_width = (width / BARS.len() as u32).max(1) as u64;
    let idx = ((x as u64 + offset) / bar_width) as usize % BARS.len();
    BARS[idx]
}

fn luma([r, g, b]: [u8; 3]) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
}

/// BT.601 full-range RGB to YUV, fixed point
fn rgb_to_yuv([r, g, b]: [u8; 3]) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = (77 * r + 150 * g + 29 * b) >> 8;
    let u = ((-43 * r - 85 * g + 128 * b) >> 8) + 128;
    let v = ((128 * r - 107 * g - 21 * b) >> 8) + 128;
    (
        y.clamp(0, 255) as u8,
        u.clamp(0, 255) as u8,
        v.clamp(0, 255) as u8,
    )
}

/// Draw one frame of the pattern into `buf`
fn render(
    buf: &mut BytesMut,
    format: PixelFormat,
    width: u32,
    height: u32,
    offset: u64,
    quality: u8,
) -> Result<(), CaptureError> {
    let row: Vec<[u8; 3]> = (0..width).map(|x| bar_colour(x, width, offset)).collect();

    match format {
        PixelFormat::Jpeg => {
            let mut rgb = Vec::with_capacity((width * height * 3) as usize);
            for _ in 0..height {
                rgb.extend(row.iter().flatten());
            }
            JpegEncoder::new_with_quality((&mut *buf).writer(), encoder_quality(quality))
                .encode(&rgb, width, height, ExtendedColorType::Rgb8)?;
        }
        PixelFormat::Rgb24 => {
            for _ in 0..height {
                for px in &row {
                    buf.put_slice(px);
                }
            }
        }
        PixelFormat::Bgr24 => {
            for _ in 0..height {
                for [r, g, b] in &row {
                    buf.put_slice(&[*b, *g, *r]);
                }
            }
        }
        PixelFormat::Rgb565 => {
            for _ in 0..height {
                for [r, g, b] in &row {
                    buf.put_u8((r & 0xF8) | (g >> 5));
                    buf.put_u8(((g & 0x1C) << 3) | (b >> 3));
                }
            }
        }
        PixelFormat::Yuyv4 => {
            for _ in 0..height {
                for pair in row.chunks(2) {
                    let (y0, u, v) = rgb_to_yuv(pair[0]);
                    let y1 = pair.get(1).map(|px| rgb_to_yuv(*px).0).unwrap_or(y0);
                    buf.put_slice(&[y0, u, y1, v]);
                }
            }
        }
        PixelFormat::Grayscale => {
            for _ in 0..height {
                for px in &row {
                    buf.put_u8(luma(*px));
                }
            }
        }
    }
    Ok(())
}

impl FrameSource for TestPatternSource {
    #[instrument(skip(self))]
    fn acquire(&self) -> Result<Frame, CaptureError> {
        self.pace();

        let mut data = self.pool.take().ok_or(CaptureError::PoolExhausted {
            capacity: self.pool.capacity(),
        })?;

        let status = self.settings.load();
        let format = self.settings.format();
        let (width, height) = status.framesize.dimensions();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;

        if let Err(e) = render(&mut data, format, width, height, sequence * 4, status.quality) {
            self.pool.give_back(data);
            return Err(e);
        }

        Ok(Frame {
            data,
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride: width,
                format,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        })
    }

    fn release(&self, frame: Frame) {
        self.pool.give_back(frame.data);
    }
}

impl Sensor for TestPatternSource {
    fn pixel_format(&self) -> PixelFormat {
        self.settings.format()
    }

    fn status(&self) -> SensorStatus {
        self.settings.load()
    }

    fn set_framesize(&self, size: FrameSize) -> Result<(), SensorError> {
        self.settings.store_framesize(size);
        Ok(())
    }

    fn set_quality(&self, quality: i32) -> Result<(), SensorError> {
        self.settings.store_quality(quality).map(|_| ())
    }
}
