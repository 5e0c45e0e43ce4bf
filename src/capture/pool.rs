//! Fixed-size frame buffer pool

use std::time::Duration;

use bytes::BytesMut;
use flume::{Receiver, Sender};

/// A fixed set of reusable frame buffers.
///
/// The free list is a flume channel: taking a buffer receives from it and
/// giving one back sends into it. Buffers that are never given back are lost
/// to the pool, which then starves.
#[derive(Clone)]
pub struct BufferPool {
    free_tx: Sender<BytesMut>,
    free_rx: Receiver<BytesMut>,
    capacity: usize,
    wait: Duration,
}

impl BufferPool {
    pub fn new(count: usize, buffer_size: usize) -> Self {
        let (free_tx, free_rx) = flume::bounded(count);
        for _ in 0..count {
            // Channel has room for exactly `count` buffers
            let _ = free_tx.send(BytesMut::with_capacity(buffer_size));
        }

        Self {
            free_tx,
            free_rx,
            capacity: count,
            wait: Duration::ZERO,
        }
    }

    /// Let [`take`](Self::take) wait up to `wait` for a buffer to come back
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Take a free buffer, or `None` when every buffer stays out for the
    /// whole wait
    pub fn take(&self) -> Option<BytesMut> {
        if self.wait.is_zero() {
            self.free_rx.try_recv().ok()
        } else {
            self.free_rx.recv_timeout(self.wait).ok()
        }
    }

    /// Return a buffer to the free list
    pub fn give_back(&self, mut buf: BytesMut) {
        buf.clear();
        if self.free_tx.try_send(buf).is_err() {
            tracing::warn!("buffer returned to a full pool, dropping it");
        }
    }

    /// Buffers currently available
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
