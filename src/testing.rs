//! Test doubles for sources, transports and PWM drivers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};

use crate::actuator::PwmDriver;
use crate::capture::{
    FrameMetadata, FrameSize, FrameSource, PixelFormat, Sensor, SensorSettings, SensorStatus,
};
use crate::capture::Frame;
use crate::error::{CaptureError, SensorError, TransportError};
use crate::transport::{ChunkTransport, Responder};

/// Raw frame filled with a deterministic gradient
pub fn raw_frame(format: PixelFormat, width: u32, height: u32) -> Frame {
    let len = format.frame_len(width, height).unwrap_or(64);
    let data: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
    frame_with(format, width, height, &data, 1)
}

pub fn frame_with(format: PixelFormat, width: u32, height: u32, data: &[u8], seq: u64) -> Frame {
    Frame {
        data: BytesMut::from(data),
        meta: Arc::new(FrameMetadata {
            sequence: seq,
            width,
            height,
            stride: width,
            format,
            device_timestamp: None,
        }),
        timestamp: Instant::now(),
    }
}

/// Frame source counting acquisitions and releases
pub struct MockSource {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    payload: Vec<u8>,
    /// Acquisitions that succeed before the source runs dry
    pub frames_available: Option<usize>,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    settings: SensorSettings,
    pub fail_framesize: bool,
}

impl MockSource {
    pub fn jpeg(payload: &[u8]) -> Self {
        Self::new(PixelFormat::Jpeg, 4, 4, payload.to_vec())
    }

    pub fn raw(format: PixelFormat, width: u32, height: u32) -> Self {
        let len = format.frame_len(width, height).unwrap_or(0);
        let payload = (0..len).map(|i| (i * 13 % 256) as u8).collect();
        Self::new(format, width, height, payload)
    }

    fn new(format: PixelFormat, width: u32, height: u32, payload: Vec<u8>) -> Self {
        Self {
            format,
            width,
            height,
            payload,
            frames_available: None,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            settings: SensorSettings::new(format, FrameSize::Qvga, 12),
            fail_framesize: false,
        }
    }

    pub fn limited(mut self, frames: usize) -> Self {
        self.frames_available = Some(frames);
        self
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl FrameSource for MockSource {
    fn acquire(&self) -> Result<Frame, CaptureError> {
        let n = self.acquired.load(Ordering::SeqCst);
        if self.frames_available.is_some_and(|limit| n >= limit) {
            return Err(CaptureError::NoFrame);
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(frame_with(
            self.format,
            self.width,
            self.height,
            &self.payload,
            n as u64 + 1,
        ))
    }

    fn release(&self, _frame: Frame) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl Sensor for MockSource {
    fn pixel_format(&self) -> PixelFormat {
        self.settings.format()
    }

    fn status(&self) -> SensorStatus {
        self.settings.load()
    }

    fn set_framesize(&self, size: FrameSize) -> Result<(), SensorError> {
        if self.fail_framesize {
            return Err(SensorError::Device(std::io::ErrorKind::Other.into()));
        }
        self.settings.store_framesize(size);
        Ok(())
    }

    fn set_quality(&self, quality: i32) -> Result<(), SensorError> {
        self.settings.store_quality(quality).map(|_| ())
    }
}

/// Transport recording every chunk, optionally failing at a given write
#[derive(Default)]
pub struct RecordingTransport {
    pub chunks: Vec<Vec<u8>>,
    pub full: Option<Bytes>,
    pub failed: Option<StatusCode>,
    pub finished: bool,
    /// Zero-based index of the first write to reject
    pub fail_at: Option<usize>,
    pub attempts: usize,
}

impl RecordingTransport {
    pub fn failing_at(write: usize) -> Self {
        Self {
            fail_at: Some(write),
            ..Default::default()
        }
    }

    pub fn body(&self) -> Vec<u8> {
        self.chunks.concat()
    }
}

impl ChunkTransport for RecordingTransport {
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        let attempt = self.attempts;
        self.attempts += 1;
        if self.fail_at.is_some_and(|at| attempt >= at) {
            return Err(TransportError::Closed);
        }
        self.chunks.push(chunk.to_vec());
        Ok(())
    }
}

impl Responder for RecordingTransport {
    fn send_full(&mut self, body: Bytes) -> Result<(), TransportError> {
        self.attempts += 1;
        self.full = Some(body);
        Ok(())
    }

    fn fail(&mut self, status: StatusCode) {
        if self.full.is_none() && self.chunks.is_empty() {
            self.failed = Some(status);
        }
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

/// PWM driver that records every write in order
#[derive(Default)]
pub struct RecordingDriver {
    pub writes: Mutex<Vec<(u8, u32)>>,
}

impl RecordingDriver {
    pub fn take(&self) -> Vec<(u8, u32)> {
        std::mem::take(&mut *self.writes.lock().unwrap())
    }
}

impl PwmDriver for RecordingDriver {
    fn write(&self, channel: u8, duty: u32) {
        self.writes.lock().unwrap().push((channel, duty));
    }
}
