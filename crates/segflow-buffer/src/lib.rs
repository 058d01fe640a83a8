#![forbid(unsafe_code)]

//! Bounded byte buffers shared between stream writers and the consumer.
//!
//! Two independent implementations sit behind the [`ByteBuffer`] trait:
//!
//! - [`RingBuffer`]: FIFO of immutable chunks with blocking write on full
//!   and blocking read (with timeout) on empty.
//! - [`ReorderingRingBuffer`]: accepts sequence-numbered chunks in any order
//!   and releases them in ascending sequence order.

mod error;
mod reorder;
mod ring;

pub use crate::{
    error::{BufferError, BufferResult},
    reorder::{ReorderPolicy, ReorderingRingBuffer},
    ring::RingBuffer,
};

use std::time::Duration;

use bytes::Bytes;

/// Default capacity used when none is configured (16 MiB).
pub const DEFAULT_CAPACITY: usize = 16 * 1024 * 1024;

/// Common contract of the stream buffers.
///
/// Writers call [`write`](Self::write) (or [`write_seq`](Self::write_seq) and
/// [`finish_seq`](Self::finish_seq) when segments may finish out of order), a
/// single consumer calls
/// [`read`](Self::read). After [`close`](Self::close) writes become no-ops and
/// reads drain whatever is left, then return an empty chunk.
pub trait ByteBuffer: Send + Sync {
    /// Append `data`, blocking while the buffer is full.
    fn write(&self, data: Bytes);

    /// Append `data` tagged with the segment sequence number it belongs to.
    ///
    /// Plain FIFO buffers ignore the tag.
    fn write_seq(&self, data: Bytes, _sequence: u64) {
        self.write(data);
    }

    /// Mark segment `sequence` as completely written, possibly with no data
    /// at all. Ordered buffers only move past a segment once it is finished.
    fn finish_seq(&self, _sequence: u64) {}

    /// Remove and return up to `max` bytes.
    ///
    /// With `block` set, waits for data until `timeout` (forever on `None`).
    ///
    /// # Errors
    ///
    /// [`BufferError::ReadTimeout`] if the wait expired with nothing buffered.
    fn read(&self, max: usize, block: bool, timeout: Option<Duration>) -> BufferResult<Bytes>;

    /// Close the buffer. Idempotent; wakes every blocked reader and writer.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Bytes currently buffered.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;
}
