//! Single JPEG capture

use std::time::Instant;

use axum::http::StatusCode;
use bytes::Bytes;
use tracing::{debug, instrument, warn};

use crate::capture::FrameSource;
use crate::codec::{ChunkSink, JpegCodec};
use crate::error::FrameError;
use crate::transport::Responder;

/// Outcome of a successful capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureReport {
    pub bytes: usize,
    /// Whether the frame was already JPEG and sent without re-encoding
    pub passthrough: bool,
}

/// Capture one frame and answer with it as a JPEG.
///
/// JPEG frames go out unmodified as a full body. Raw frames are encoded at
/// `quality` straight into a chunked body. The frame goes back to `source`
/// on every path.
#[instrument(skip_all)]
pub fn capture_jpeg<R: Responder + ?Sized>(
    source: &dyn FrameSource,
    codec: &dyn JpegCodec,
    quality: u8,
    responder: &mut R,
) -> Result<CaptureReport, FrameError> {
    let start = Instant::now();

    let frame = match source.acquire() {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Camera capture failed: {}", e);
            responder.fail(StatusCode::INTERNAL_SERVER_ERROR);
            return Err(e.into());
        }
    };

    let report = if frame.is_jpeg() {
        let bytes = frame.len();
        let sent = responder.send_full(Bytes::copy_from_slice(&frame.data));
        source.release(frame);
        sent?;
        CaptureReport {
            bytes,
            passthrough: true,
        }
    } else {
        let (encoded, sent) = {
            let mut sink = ChunkSink::new(&mut *responder);
            let encoded = codec.encode_chunked(&frame, quality, &mut sink);
            (encoded, sink.bytes_sent())
        };
        source.release(frame);

        match encoded {
            Ok(_) => {
                responder.finish();
                CaptureReport {
                    bytes: sent,
                    passthrough: false,
                }
            }
            Err(e) => {
                warn!("JPEG compression failed: {}", e);
                responder.fail(StatusCode::INTERNAL_SERVER_ERROR);
                return Err(e.into());
            }
        }
    };

    let elapsed = start.elapsed();
    metrics::histogram!("capture_time_ms").record(elapsed.as_secs_f64() * 1000.0);
    debug!("JPG: {}B {}ms", report.bytes, elapsed.as_millis());

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;
    use crate::codec::{EncodeSink, ImageCodec};
    use crate::error::{CaptureError, CodecError};
    use crate::testing::{MockSource, RecordingTransport};
    use crate::capture::Frame;

    struct BrokenCodec;

    impl JpegCodec for BrokenCodec {
        fn encode(&self, _frame: &Frame, _quality: u8) -> Result<Vec<u8>, CodecError> {
            Err(CodecError::Unsupported(PixelFormat::Rgb565))
        }

        fn encode_chunked(
            &self,
            _frame: &Frame,
            _quality: u8,
            _sink: &mut dyn EncodeSink,
        ) -> Result<usize, CodecError> {
            Err(CodecError::Unsupported(PixelFormat::Rgb565))
        }
    }

    #[test]
    fn test_jpeg_frame_sent_unmodified() {
        let payload = b"\xFF\xD8fake-jpeg\xFF\xD9";
        let source = MockSource::jpeg(payload);
        let mut transport = RecordingTransport::default();

        let report = capture_jpeg(&source, &ImageCodec::default(), 80, &mut transport).unwrap();

        assert!(report.passthrough);
        assert_eq!(report.bytes, payload.len());
        assert_eq!(transport.full.as_deref(), Some(&payload[..]));
        assert!(transport.chunks.is_empty());
        assert_eq!(source.released(), 1);
    }

    #[test]
    fn test_raw_frame_streams_chunks() {
        let source = MockSource::raw(PixelFormat::Rgb24, 32, 32);
        let mut transport = RecordingTransport::default();

        let report = capture_jpeg(&source, &ImageCodec::new(128), 80, &mut transport).unwrap();

        let body = transport.body();
        assert!(!report.passthrough);
        assert_eq!(report.bytes, body.len());
        assert!(transport.chunks.len() > 1);
        assert_eq!(&body[..2], &[0xFF, 0xD8]);
        assert!(transport.finished);
        assert_eq!(source.released(), 1);
    }

    #[test]
    fn test_acquire_failure_reports_500() {
        let source = MockSource::jpeg(b"x").limited(0);
        let mut transport = RecordingTransport::default();

        let err = capture_jpeg(&source, &ImageCodec::default(), 80, &mut transport).unwrap_err();

        assert!(matches!(err, FrameError::Capture(CaptureError::NoFrame)));
        assert_eq!(transport.failed, Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(source.released(), 0);
    }

    #[test]
    fn test_encode_failure_still_releases() {
        let source = MockSource::raw(PixelFormat::Rgb565, 8, 8);
        let mut transport = RecordingTransport::default();

        let err = capture_jpeg(&source, &BrokenCodec, 80, &mut transport).unwrap_err();

        assert!(matches!(err, FrameError::Codec(_)));
        assert_eq!(transport.failed, Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(source.acquired(), 1);
        assert_eq!(source.released(), 1);
    }

    #[test]
    fn test_transport_failure_midway_releases() {
        let source = MockSource::raw(PixelFormat::Rgb24, 64, 64);
        let mut transport = RecordingTransport::failing_at(1);

        let err = capture_jpeg(&source, &ImageCodec::new(64), 80, &mut transport).unwrap_err();

        assert!(matches!(err, FrameError::Codec(CodecError::Aborted)));
        assert_eq!(transport.chunks.len(), 1);
        assert_eq!(transport.failed, None);
        assert_eq!(source.released(), 1);
    }
}
