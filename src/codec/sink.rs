//! Chunked encode sinks

use crate::transport::ChunkTransport;

/// Whether the encoder should keep producing output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFlow {
    Continue,
    Abort,
}

/// Receives successive ranges of encoded output.
///
/// `index` is the byte offset of `data` within the current encode; an index
/// of zero starts a new encode.
pub trait EncodeSink {
    fn write(&mut self, index: usize, data: &[u8]) -> SinkFlow;
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, index: usize, data: &[u8]) -> SinkFlow {
        if index == 0 {
            self.clear();
        }
        self.extend_from_slice(data);
        SinkFlow::Continue
    }
}

/// Forwards encoded ranges straight into a response body
pub struct ChunkSink<'a, T: ChunkTransport + ?Sized> {
    transport: &'a mut T,
    len: usize,
}

impl<'a, T: ChunkTransport + ?Sized> ChunkSink<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Self { transport, len: 0 }
    }

    /// Bytes delivered since the last encode started
    pub fn bytes_sent(&self) -> usize {
        self.len
    }
}

impl<T: ChunkTransport + ?Sized> EncodeSink for ChunkSink<'_, T> {
    fn write(&mut self, index: usize, data: &[u8]) -> SinkFlow {
        if index == 0 {
            self.len = 0;
        }
        if self.transport.send_chunk(data).is_err() {
            return SinkFlow::Abort;
        }
        self.len += data.len();
        SinkFlow::Continue
    }
}
