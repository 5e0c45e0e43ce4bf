//! Response transport between blocking handlers and the HTTP layer.
//!
//! Handlers run on blocking workers and talk to the response through
//! [`Responder`]. [`ChannelResponder`] bridges that to axum: the response head
//! travels over a oneshot, body chunks over a bounded flume channel that the
//! HTTP body drains. When the client goes away the body is dropped and the
//! next write fails, which is how a stream session learns it is over.

use axum::http::StatusCode;
use bytes::Bytes;
use flume::Receiver;
use tokio::sync::oneshot;

use crate::error::TransportError;

/// Sends bytes to the open response, possibly over several writes
pub trait ChunkTransport {
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError>;
}

/// A response under construction
pub trait Responder: ChunkTransport {
    /// Send a complete body in one piece
    fn send_full(&mut self, body: Bytes) -> Result<(), TransportError>;

    /// Report a failure status. Ignored once the body has started.
    fn fail(&mut self, status: StatusCode);

    /// Terminate a chunked body
    fn finish(&mut self);
}

/// How the HTTP layer should answer
pub enum ResponseHead {
    Full(Bytes),
    Streaming(Receiver<Bytes>),
    Failed(StatusCode),
}

impl std::fmt::Debug for ResponseHead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseHead::Full(body) => f.debug_tuple("Full").field(&body.len()).finish(),
            ResponseHead::Streaming(_) => f.write_str("Streaming"),
            ResponseHead::Failed(status) => f.debug_tuple("Failed").field(status).finish(),
        }
    }
}

/// [`Responder`] backed by channels, used from `spawn_blocking` workers
pub struct ChannelResponder {
    head: Option<oneshot::Sender<ResponseHead>>,
    body: Option<flume::Sender<Bytes>>,
    depth: usize,
}

/// Create a responder and the receiver the HTTP handler awaits
pub fn channel(depth: usize) -> (ChannelResponder, oneshot::Receiver<ResponseHead>) {
    let (tx, rx) = oneshot::channel();
    let responder = ChannelResponder {
        head: Some(tx),
        body: None,
        depth: depth.max(1),
    };
    (responder, rx)
}

impl ChannelResponder {
    fn send_head(&mut self, head: ResponseHead) -> Result<(), TransportError> {
        let tx = self.head.take().ok_or(TransportError::Closed)?;
        tx.send(head).map_err(|_| TransportError::Closed)
    }

    /// Whether the response head has gone out
    pub fn started(&self) -> bool {
        self.head.is_none()
    }
}

impl ChunkTransport for ChannelResponder {
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        if self.body.is_none() {
            if self.started() {
                // Full body already sent or chunked body finished
                return Err(TransportError::Closed);
            }
            let (tx, rx) = flume::bounded(self.depth);
            self.send_head(ResponseHead::Streaming(rx))?;
            self.body = Some(tx);
        }

        let body = self.body.as_ref().ok_or(TransportError::Closed)?;
        body.send(Bytes::copy_from_slice(chunk))
            .map_err(|_| TransportError::Closed)
    }
}

impl Responder for ChannelResponder {
    fn send_full(&mut self, body: Bytes) -> Result<(), TransportError> {
        self.send_head(ResponseHead::Full(body))
    }

    fn fail(&mut self, status: StatusCode) {
        if !self.started() {
            let _ = self.send_head(ResponseHead::Failed(status));
        }
    }

    fn finish(&mut self) {
        self.body = None;
    }
}
