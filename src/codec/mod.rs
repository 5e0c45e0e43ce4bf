pub mod convert;
pub mod jpeg;
pub mod sink;

pub use jpeg::ImageCodec;
pub use sink::{ChunkSink, EncodeSink, SinkFlow};

use crate::capture::Frame;
use crate::error::CodecError;

/// Turns captured frames into JPEG bytes
pub trait JpegCodec: Send + Sync {
    /// Encode the whole frame into a freshly allocated buffer
    fn encode(&self, frame: &Frame, quality: u8) -> Result<Vec<u8>, CodecError>;

    /// Encode the frame, handing output to `sink` as it is produced.
    ///
    /// Returns the number of bytes delivered. Stops early with
    /// [`CodecError::Aborted`] once the sink asks to abort.
    fn encode_chunked(
        &self,
        frame: &Frame,
        quality: u8,
        sink: &mut dyn EncodeSink,
    ) -> Result<usize, CodecError>;
}
