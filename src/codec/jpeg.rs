//! JPEG encoding on top of the `image` crate

use std::io::{self, BufWriter, Write};

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageError};
use tracing::instrument;

use super::convert::to_rgb888;
use super::{EncodeSink, JpegCodec, SinkFlow};
use crate::capture::{Frame, PixelFormat};
use crate::error::CodecError;

/// Software JPEG codec
pub struct ImageCodec {
    chunk_size: usize,
}

impl ImageCodec {
    /// `chunk_size` bounds the size of each range handed to a sink
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(64),
        }
    }
}

impl Default for ImageCodec {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl JpegCodec for ImageCodec {
    #[instrument(skip(self, frame), fields(seq = frame.meta.sequence))]
    fn encode(&self, frame: &Frame, quality: u8) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(frame.len() / 4);
        encode_into(frame, quality, &mut out)?;
        Ok(out)
    }

    #[instrument(skip(self, frame, sink), fields(seq = frame.meta.sequence))]
    fn encode_chunked(
        &self,
        frame: &Frame,
        quality: u8,
        sink: &mut dyn EncodeSink,
    ) -> Result<usize, CodecError> {
        let mut writer = BufWriter::with_capacity(self.chunk_size, SinkWriter::new(sink));
        let result = encode_into(frame, quality, &mut writer).and_then(|()| {
            writer
                .flush()
                .map_err(|e| CodecError::Encode(ImageError::IoError(e)))
        });

        let inner = writer.get_ref();
        if inner.aborted {
            return Err(CodecError::Aborted);
        }
        result?;
        Ok(inner.offset)
    }
}

fn encode_into<W: Write>(frame: &Frame, quality: u8, mut out: W) -> Result<(), CodecError> {
    let meta = &frame.meta;
    let quality = quality.clamp(1, 100);

    match meta.format {
        PixelFormat::Jpeg => out
            .write_all(&frame.data)
            .map_err(|e| CodecError::Encode(ImageError::IoError(e))),
        PixelFormat::Grayscale => {
            let expected = meta.width as usize * meta.height as usize;
            if frame.len() != expected {
                return Err(CodecError::InvalidLength {
                    format: meta.format,
                    expected,
                    actual: frame.len(),
                });
            }
            JpegEncoder::new_with_quality(out, quality).encode(
                &frame.data,
                meta.width,
                meta.height,
                ExtendedColorType::L8,
            )?;
            Ok(())
        }
        format => {
            let rgb = to_rgb888(&frame.data, meta.width, meta.height, format)?;
            JpegEncoder::new_with_quality(out, quality).encode(
                &rgb,
                meta.width,
                meta.height,
                ExtendedColorType::Rgb8,
            )?;
            Ok(())
        }
    }
}

/// Adapts an [`EncodeSink`] to `io::Write`, tracking the running offset
struct SinkWriter<'a> {
    sink: &'a mut dyn EncodeSink,
    offset: usize,
    aborted: bool,
}

impl<'a> SinkWriter<'a> {
    fn new(sink: &'a mut dyn EncodeSink) -> Self {
        Self {
            sink,
            offset: 0,
            aborted: false,
        }
    }
}

impl Write for SinkWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Never call back into a sink that asked us to stop
        if self.aborted {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        match self.sink.write(self.offset, buf) {
            SinkFlow::Continue => {
                self.offset += buf.len();
                Ok(buf.len())
            }
            SinkFlow::Abort => {
                self.aborted = true;
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink aborted"))
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
