//! Bounded byte queue decoupling a socket's read rate from its write rate.
//!
//! # Responsibilities
//! - Queue bytes between a producing and a consuming half-connection
//! - Enforce a hard capacity: a full buffer signals backpressure to the producer
//! - Expose line-oriented peeking for the framing parser
//!
//! # Design Decisions
//! - Sliding window over `BytesMut`: the producer may append while the
//!   consumer has only partially drained
//! - Capacity violations are a distinct, recoverable condition, not an I/O error

use bytes::{Buf, Bytes, BytesMut};

/// Returned by [`Buffer::push`] when the write would exceed capacity.
///
/// The producer must stop reading its source until the consumer drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("buffer full, producer must pause")]
pub struct Backpressure;

/// A growable byte queue with a fixed upper bound.
#[derive(Debug)]
pub struct Buffer {
    data: BytesMut,
    capacity: usize,
}

impl Buffer {
    /// Create an empty buffer that holds at most `capacity` unread bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::new(),
            capacity,
        }
    }

    /// Append bytes to the back of the queue.
    ///
    /// Fails with [`Backpressure`] if the resulting size would exceed capacity;
    /// on failure nothing is written.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), Backpressure> {
        if self.data.len() + bytes.len() > self.capacity {
            return Err(Backpressure);
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Remove and return up to `max_n` bytes from the front.
    pub fn pull(&mut self, max_n: usize) -> Bytes {
        let n = max_n.min(self.data.len());
        self.data.split_to(n).freeze()
    }

    /// Discard `n` bytes from the front. `n` must not exceed `len()`.
    pub fn consume(&mut self, n: usize) {
        self.data.advance(n);
    }

    /// Return the first complete line (terminator included) without consuming
    /// it, or `None` if no terminator is present yet.
    ///
    /// Both `\r\n` and bare `\n` terminate a line.
    pub fn peek_line(&self) -> Option<&[u8]> {
        let idx = self.data.iter().position(|&b| b == b'\n')?;
        Some(&self.data[..=idx])
    }

    /// The unread region as a contiguous slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True once `len()` has reached capacity.
    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    /// Bytes that can still be pushed before the buffer is full.
    pub fn spare(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
