#![forbid(unsafe_code)]

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::trace;

use crate::{BufferError, BufferResult, ByteBuffer, DEFAULT_CAPACITY};

struct RingState {
    chunks: VecDeque<Bytes>,
    len: usize,
    capacity: usize,
    closed: bool,
}

impl RingState {
    fn free(&self) -> usize {
        self.capacity.saturating_sub(self.len)
    }

    fn take(&mut self, max: usize) -> Bytes {
        let want = max.min(self.len);
        if want == 0 {
            return Bytes::new();
        }

        // Fast path: the front chunk alone covers the request, no copy.
        if let Some(front) = self.chunks.front_mut()
            && front.len() >= want
        {
            let out = front.split_to(want);
            if front.is_empty() {
                self.chunks.pop_front();
            }
            self.len -= want;
            return out;
        }

        let mut out = BytesMut::with_capacity(want);
        while out.len() < want {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let n = (want - out.len()).min(front.len());
            out.extend_from_slice(&front.split_to(n));
            if front.is_empty() {
                self.chunks.pop_front();
            }
        }
        self.len -= out.len();
        out.freeze()
    }
}

/// Fixed-capacity FIFO byte queue with blocking semantics.
///
/// Data is stored as a queue of immutable [`Bytes`] chunks so large buffers
/// never reallocate. A chunk's read cursor is the chunk itself: partially
/// consumed chunks are split in place.
pub struct RingBuffer {
    state: Mutex<RingState>,
    /// Signalled when data becomes available or the buffer closes.
    used: Condvar,
    /// Signalled when capacity frees up or the buffer closes.
    free: Condvar,
}

impl RingBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                chunks: VecDeque::new(),
                len: 0,
                capacity: capacity.max(1),
                closed: false,
            }),
            used: Condvar::new(),
            free: Condvar::new(),
        }
    }

    /// Change the capacity. Already buffered data is kept even if it now
    /// exceeds the new capacity; writers wait until it drains below.
    pub fn resize(&self, capacity: usize) {
        let mut state = self.state.lock();
        state.capacity = capacity.max(1);
        if state.free() > 0 {
            self.free.notify_all();
        }
    }

    /// Bytes that can be written without blocking.
    pub fn free(&self) -> usize {
        self.state.lock().free()
    }

    pub fn is_full(&self) -> bool {
        self.state.lock().free() == 0
    }

    /// Wait until there is free capacity or the buffer is closed.
    ///
    /// Returns `false` if `timeout` expired first.
    pub fn wait_free(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.state.lock();
        Self::wait_while(&self.free, &mut state, timeout, |s| {
            s.free() == 0 && !s.closed
        })
    }

    /// Wait until data is buffered or the buffer is closed.
    ///
    /// Returns `false` if `timeout` expired first.
    pub fn wait_used(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.state.lock();
        Self::wait_while(&self.used, &mut state, timeout, |s| {
            s.len == 0 && !s.closed
        })
    }

    fn wait_while(
        condvar: &Condvar,
        state: &mut MutexGuard<'_, RingState>,
        timeout: Option<Duration>,
        blocked: impl Fn(&RingState) -> bool,
    ) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        while blocked(&**state) {
            match deadline {
                Some(deadline) => {
                    if condvar.wait_until(state, deadline).timed_out() {
                        return !blocked(&**state);
                    }
                }
                None => condvar.wait(state),
            }
        }
        true
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ByteBuffer for RingBuffer {
    fn write(&self, mut data: Bytes) {
        let mut state = self.state.lock();
        while !data.is_empty() {
            while state.free() == 0 && !state.closed {
                self.free.wait(&mut state);
            }
            if state.closed {
                trace!(dropped = data.len(), "ring: write after close ignored");
                return;
            }

            let n = state.free().min(data.len());
            let chunk = data.split_to(n);
            state.len += chunk.len();
            state.chunks.push_back(chunk);
            self.used.notify_all();
        }
    }

    fn read(&self, max: usize, block: bool, timeout: Option<Duration>) -> BufferResult<Bytes> {
        let mut state = self.state.lock();
        if block
            && !Self::wait_while(&self.used, &mut state, timeout, |s| {
                s.len == 0 && !s.closed
            })
        {
            return Err(BufferError::ReadTimeout);
        }

        let out = state.take(max);
        if !out.is_empty() {
            self.free.notify_all();
        }
        Ok(out)
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.used.notify_all();
        self.free.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn len(&self) -> usize {
        self.state.lock().len
    }

    fn capacity(&self) -> usize {
        self.state.lock().capacity
    }
}
