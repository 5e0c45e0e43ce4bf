//! Continuous MJPEG stream over a multipart response.
//!
//! Each connection runs [`StreamSession::run`] on a blocking worker. Every
//! iteration captures a frame, makes sure it is JPEG, and writes one part:
//! header, payload, boundary. The loop only ends when something fails, which
//! in practice means the client went away.

use std::time::Instant;

use axum::http::StatusCode;
use tracing::{debug, info, trace, warn};

use crate::capture::{Frame, FrameSource};
use crate::codec::JpegCodec;
use crate::error::{FrameError, TransportError};
use crate::transport::{ChunkTransport, Responder};

pub const PART_BOUNDARY: &str = "123456789000000000000987654321";

/// Content type of the stream response
pub const STREAM_CONTENT_TYPE: &str =
    "multipart/x-mixed-replace;boundary=123456789000000000000987654321";

/// Delimiter written after every part
pub const STREAM_BOUNDARY: &str = "\r\n--123456789000000000000987654321\r\n";

/// Header block preceding a part of `len` payload bytes
pub fn part_header(len: usize) -> String {
    format!("Content-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n", len)
}

/// Where a session is in its capture/encode/send cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Capturing,
    Encoding,
    Sending,
    Error,
    Terminated,
}

/// JPEG bytes tagged with who owns them
enum JpegBuffer {
    /// Frame already held JPEG; the buffer belongs to the source's pool
    Pooled(Frame),
    /// Produced by conversion; ours to free
    Converted(Vec<u8>),
}

/// How a [`JpegBuffer`] was disposed of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    ReturnedToPool,
    Freed,
}

impl JpegBuffer {
    fn bytes(&self) -> &[u8] {
        match self {
            JpegBuffer::Pooled(frame) => &frame.data,
            JpegBuffer::Converted(buf) => buf,
        }
    }

    fn release(self, source: &dyn FrameSource) -> Release {
        match self {
            JpegBuffer::Pooled(frame) => {
                source.release(frame);
                Release::ReturnedToPool
            }
            JpegBuffer::Converted(buf) => {
                drop(buf);
                Release::Freed
            }
        }
    }
}

/// Counters kept for the lifetime of one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Iterations that reached the sending stage
    pub parts_attempted: u64,
    /// Parts written completely
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub returned_to_pool: u64,
    pub freed: u64,
}

/// One client connection's stream
pub struct StreamSession<'a> {
    source: &'a dyn FrameSource,
    codec: &'a dyn JpegCodec,
    quality: u8,
    state: StreamState,
    last_frame: Option<Instant>,
    stats: StreamStats,
}

impl<'a> StreamSession<'a> {
    /// `quality` applies only to frames that need conversion
    pub fn new(source: &'a dyn FrameSource, codec: &'a dyn JpegCodec, quality: u8) -> Self {
        Self {
            source,
            codec,
            quality,
            state: StreamState::Idle,
            last_frame: None,
            stats: StreamStats::default(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Stream until the first failure and return it.
    ///
    /// A failure before any byte was written is reported as a 500.
    pub fn run<R: Responder + ?Sized>(&mut self, responder: &mut R) -> FrameError {
        info!("Stream session started");
        let err = loop {
            if let Err(e) = self.step(&mut *responder) {
                break e;
            }
        };
        self.state = StreamState::Terminated;
        responder.fail(StatusCode::INTERNAL_SERVER_ERROR);

        match &err {
            FrameError::Transport(_) => info!(
                "Stream session closed after {} frames",
                self.stats.frames_sent
            ),
            e => warn!(
                "Stream session failed after {} frames: {}",
                self.stats.frames_sent, e
            ),
        }
        err
    }

    /// Run a single capture, encode and send cycle
    pub fn step<T: ChunkTransport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<(), FrameError> {
        self.state = StreamState::Capturing;
        let frame = self.source.acquire().map_err(|e| {
            warn!("Camera capture failed: {}", e);
            self.fail(e)
        })?;

        self.state = StreamState::Encoding;
        let buffer = if frame.is_jpeg() {
            JpegBuffer::Pooled(frame)
        } else {
            let converted = self.codec.encode(&frame, self.quality);
            // Encoded bytes no longer depend on the frame
            self.source.release(frame);
            match converted {
                Ok(buf) => JpegBuffer::Converted(buf),
                Err(e) => {
                    warn!("JPEG compression failed: {}", e);
                    return Err(self.fail(e));
                }
            }
        };

        self.state = StreamState::Sending;
        self.stats.parts_attempted += 1;
        let len = buffer.bytes().len();
        let sent = send_part(transport, buffer.bytes());
        match buffer.release(self.source) {
            Release::ReturnedToPool => self.stats.returned_to_pool += 1,
            Release::Freed => self.stats.freed += 1,
        }
        if let Err(e) = sent {
            debug!("Stream write failed: {}", e);
            return Err(self.fail(e));
        }

        self.stats.frames_sent += 1;
        self.stats.bytes_sent += len as u64;
        self.state = StreamState::Idle;
        self.record_frame(len);
        Ok(())
    }

    fn fail(&mut self, err: impl Into<FrameError>) -> FrameError {
        self.state = StreamState::Error;
        err.into()
    }

    fn record_frame(&mut self, len: usize) {
        let now = Instant::now();
        let frame_ms = self
            .last_frame
            .map(|last| now.duration_since(last).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        self.last_frame = Some(now);

        metrics::counter!("stream_frames_total").increment(1);
        metrics::counter!("stream_bytes_total").increment(len as u64);
        if frame_ms > 0.0 {
            metrics::histogram!("stream_frame_time_ms").record(frame_ms);
            trace!(
                "MJPG: {}B {:.0}ms ({:.1}fps)",
                len,
                frame_ms,
                1000.0 / frame_ms
            );
        }
    }
}

/// Write one multipart part. Stops at the first failed write.
fn send_part<T: ChunkTransport + ?Sized>(
    transport: &mut T,
    jpeg: &[u8],
) -> Result<(), TransportError> {
    transport.send_chunk(part_header(jpeg.len()).as_bytes())?;
    transport.send_chunk(jpeg)?;
    transport.send_chunk(STREAM_BOUNDARY.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;
    use crate::codec::ImageCodec;
    use crate::error::{CaptureError, CodecError};
    use crate::testing::{MockSource, RecordingTransport};

    #[test]
    fn test_part_layout() {
        let source = MockSource::jpeg(b"JPEG").limited(1);
        let codec = ImageCodec::default();
        let mut transport = RecordingTransport::default();

        let mut session = StreamSession::new(&source, &codec, 80);
        session.step(&mut transport).unwrap();

        assert_eq!(
            transport.chunks,
            vec![
                b"Content-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n".to_vec(),
                b"JPEG".to_vec(),
                STREAM_BOUNDARY.as_bytes().to_vec(),
            ]
        );
        assert_eq!(session.state(), StreamState::Idle);
    }

    #[test]
    fn test_runs_until_source_fails() {
        let source = MockSource::jpeg(b"JPEG").limited(3);
        let codec = ImageCodec::default();
        let mut transport = RecordingTransport::default();

        let mut session = StreamSession::new(&source, &codec, 80);
        let err = session.run(&mut transport);

        assert!(matches!(err, FrameError::Capture(CaptureError::NoFrame)));
        assert_eq!(session.state(), StreamState::Terminated);
        assert_eq!(session.stats().frames_sent, 3);
        assert_eq!(transport.chunks.len(), 9);
        assert_eq!(source.acquired(), source.released());
        // Body already started, so no status can be reported
        assert_eq!(transport.failed, None);
    }

    #[test]
    fn test_stops_at_first_failed_write() {
        for fail_at in 0..6 {
            let source = MockSource::jpeg(b"JPEG");
            let codec = ImageCodec::default();
            let mut transport = RecordingTransport::failing_at(fail_at);

            let mut session = StreamSession::new(&source, &codec, 80);
            let err = session.run(&mut transport);

            assert!(matches!(err, FrameError::Transport(_)));
            // No write attempted after the failing one
            assert_eq!(transport.attempts, fail_at + 1);
            assert_eq!(source.acquired(), fail_at / 3 + 1);
            assert_eq!(source.acquired(), source.released());
        }
    }

    #[test]
    fn test_one_release_per_sent_part() {
        let source = MockSource::jpeg(b"JPEG");
        let codec = ImageCodec::default();
        let mut transport = RecordingTransport::failing_at(10);

        let mut session = StreamSession::new(&source, &codec, 80);
        session.run(&mut transport);

        let stats = session.stats();
        assert_eq!(stats.parts_attempted, 4);
        assert_eq!(stats.returned_to_pool + stats.freed, stats.parts_attempted);
        assert_eq!(stats.freed, 0);
    }

    #[test]
    fn test_converted_frames_are_freed() {
        let source = MockSource::raw(PixelFormat::Rgb565, 16, 16).limited(2);
        let codec = ImageCodec::default();
        let mut transport = RecordingTransport::default();

        let mut session = StreamSession::new(&source, &codec, 80);
        session.run(&mut transport);

        let stats = session.stats();
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.freed, 2);
        assert_eq!(stats.returned_to_pool, 0);
        // Frames went back right after conversion
        assert_eq!(source.released(), 2);

        let header = String::from_utf8(transport.chunks[0].clone()).unwrap();
        let payload = &transport.chunks[1];
        assert_eq!(header, part_header(payload.len()));
        assert_eq!(&payload[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_conversion_failure_terminates() {
        let mut source = MockSource::raw(PixelFormat::Rgb24, 8, 8);
        // Buffer no longer matches the advertised geometry
        source.width = 9;
        let codec = ImageCodec::default();
        let mut transport = RecordingTransport::default();

        let mut session = StreamSession::new(&source, &codec, 80);
        let err = session.run(&mut transport);

        assert!(matches!(err, FrameError::Codec(_)));
        assert!(transport.chunks.is_empty());
        assert_eq!(transport.failed, Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(source.released(), 1);
    }

    #[test]
    fn test_unpaired_yuyv_pixel_fails_cleanly() {
        let source = MockSource::raw(PixelFormat::Yuyv4, 3, 3);
        let codec = ImageCodec::default();
        let mut transport = RecordingTransport::default();

        let mut session = StreamSession::new(&source, &codec, 80);
        let err = session.run(&mut transport);

        assert!(matches!(
            err,
            FrameError::Codec(CodecError::UnpairedPixel { .. })
        ));
        assert_eq!(transport.failed, Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(source.acquired(), 1);
        assert_eq!(source.acquired(), source.released());
    }
}
